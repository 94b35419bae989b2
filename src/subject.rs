// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 U.S. Federal Government (in countries where recognized)
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Ordered certificate subject.
//!
//! A [`Subject`] is an ordered list of `(short name, value)` pairs such as
//! `C=SE`, `O=Gurk`, `CN=Gurk`. The order is preserved all the way into the
//! encoded distinguished name of the CSR.

use std::fmt;
use std::str::FromStr;

use openssl::x509::{X509Name, X509NameBuilder};

use crate::error::{EnrollError, Result};

/// A single subject attribute, e.g. `CN=device.example.com`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubjectAttribute {
    /// Attribute short name (`C`, `O`, `OU`, `CN`, ...).
    pub short_name: String,
    /// Attribute value.
    pub value: String,
}

impl SubjectAttribute {
    /// Create a new attribute.
    pub fn new(short_name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            short_name: short_name.into(),
            value: value.into(),
        }
    }
}

impl FromStr for SubjectAttribute {
    type Err = EnrollError;

    fn from_str(s: &str) -> Result<Self> {
        let (name, value) = s
            .split_once('=')
            .ok_or_else(|| EnrollError::invalid_subject(format!("missing '=' in {s:?}")))?;

        let name = name.trim();
        if name.is_empty() {
            return Err(EnrollError::invalid_subject(format!(
                "empty attribute name in {s:?}"
            )));
        }

        Ok(Self::new(name, value.trim()))
    }
}

impl fmt::Display for SubjectAttribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.short_name, self.value)
    }
}

/// Ordered subject attribute list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Subject {
    attributes: Vec<SubjectAttribute>,
}

impl Subject {
    /// Create an empty subject.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a subject from `(short name, value)` pairs, keeping their order.
    pub fn from_pairs<I, N, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (N, V)>,
        N: Into<String>,
        V: Into<String>,
    {
        Self {
            attributes: pairs
                .into_iter()
                .map(|(name, value)| SubjectAttribute::new(name, value))
                .collect(),
        }
    }

    /// Parse a comma-separated subject such as `C=SE,O=Gurk,CN=Gurk`.
    pub fn parse(s: &str) -> Result<Self> {
        let attributes = s
            .split(',')
            .filter(|part| !part.trim().is_empty())
            .map(str::parse::<SubjectAttribute>)
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { attributes })
    }

    /// Append an attribute.
    pub fn push(&mut self, short_name: impl Into<String>, value: impl Into<String>) {
        self.attributes
            .push(SubjectAttribute::new(short_name, value));
    }

    /// Append an attribute, builder style.
    pub fn with(mut self, short_name: impl Into<String>, value: impl Into<String>) -> Self {
        self.push(short_name, value);
        self
    }

    /// Iterate over the attributes in order.
    pub fn iter(&self) -> impl Iterator<Item = &SubjectAttribute> {
        self.attributes.iter()
    }

    /// Number of attributes.
    pub fn len(&self) -> usize {
        self.attributes.len()
    }

    /// Returns true if no attributes are set.
    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }

    /// Encode as an X.509 distinguished name in attribute order.
    ///
    /// Unknown short names are rejected by OpenSSL.
    pub fn to_x509_name(&self) -> Result<X509Name> {
        let mut builder = X509NameBuilder::new()?;
        for attr in &self.attributes {
            builder.append_entry_by_text(&attr.short_name, &attr.value)?;
        }
        Ok(builder.build())
    }
}

impl FromIterator<SubjectAttribute> for Subject {
    fn from_iter<T: IntoIterator<Item = SubjectAttribute>>(iter: T) -> Self {
        Self {
            attributes: iter.into_iter().collect(),
        }
    }
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, attr) in self.attributes.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{attr}")?;
        }
        Ok(())
    }
}
