// Field projection for key listings: a closed set of named summary columns.
use std::fmt;
use std::str::FromStr;

use crate::core::error::{Error, ErrorKind};
use crate::core::summary::KeySummary;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SummaryField {
    Key,
    ValueSize,
    AllVersionsValueSize,
    VersionCount,
    Value,
}

impl SummaryField {
    pub const ALL: [SummaryField; 5] = [
        SummaryField::Key,
        SummaryField::ValueSize,
        SummaryField::AllVersionsValueSize,
        SummaryField::VersionCount,
        SummaryField::Value,
    ];

    pub fn name(self) -> &'static str {
        match self {
            SummaryField::Key => "key",
            SummaryField::ValueSize => "value-size",
            SummaryField::AllVersionsValueSize => "all-versions-value-size",
            SummaryField::VersionCount => "version-count",
            SummaryField::Value => "value",
        }
    }

    /// Column bytes for `summary`; the key is written exactly as stored.
    pub fn render(self, summary: &KeySummary) -> Vec<u8> {
        match self {
            SummaryField::Key => summary.key_bytes.clone(),
            SummaryField::ValueSize => summary.stats.value_size.to_string().into_bytes(),
            SummaryField::AllVersionsValueSize => {
                summary.stats.all_versions_value_size.to_string().into_bytes()
            }
            SummaryField::VersionCount => summary.stats.version_count.to_string().into_bytes(),
            SummaryField::Value => summary
                .value
                .as_ref()
                .and_then(|value| serde_json::to_vec(value).ok())
                .unwrap_or_default(),
        }
    }
}

impl FromStr for SummaryField {
    type Err = Error;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        SummaryField::ALL
            .into_iter()
            .find(|field| field.name() == name)
            .ok_or_else(|| {
                Error::new(ErrorKind::UnknownField)
                    .with_message(format!("unrecognized field: {name}"))
                    .with_hint(format!("Fields are a comma separated list of: {}", field_names()))
            })
    }
}

impl fmt::Display for SummaryField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

pub fn field_names() -> String {
    SummaryField::ALL
        .iter()
        .map(|field| field.name())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Parses a comma separated field list such as `key,value-size`.
pub fn parse_field_list(list: &str) -> Result<Vec<SummaryField>, Error> {
    let names = list
        .split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .collect::<Vec<_>>();
    if names.is_empty() {
        return Err(Error::new(ErrorKind::Usage)
            .with_message("no fields provided, nothing to output")
            .with_hint(format!("Pass --fields with any of: {}", field_names())));
    }
    names
        .into_iter()
        .map(|name| name.parse::<SummaryField>())
        .collect()
}

/// One space-joined line (without newline) for `summary`.
pub fn project(summary: &KeySummary, fields: &[SummaryField]) -> Vec<u8> {
    let mut line = Vec::new();
    for (index, field) in fields.iter().enumerate() {
        if index > 0 {
            line.push(b' ');
        }
        line.extend(field.render(summary));
    }
    line
}
