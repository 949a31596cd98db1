//
// Copyright (c) 2024, 2025 Oracle and/or its affiliates. All rights reserved.
//
// Licensed under the Universal Permissive License v 1.0 as shown at
//  https://oss.oracle.com/licenses/upl/
//
use crate::error::{conn_err, ConnectError, ConnectErrorKind};
use std::str::FromStr;

/// Which network path to a cloud instance a connection should use.
///
/// `PRIMARY` and `PUBLIC` are accepted as synonyms when parsing
/// (see design notes on preserving both spellings for compatibility); both
/// parse to the same `Primary` variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IpType {
    Primary,
    Private,
    Psc,
}

impl FromStr for IpType {
    type Err = ConnectError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "PRIMARY" | "PUBLIC" => Ok(IpType::Primary),
            "PRIVATE" => Ok(IpType::Private),
            "PSC" => Ok(IpType::Psc),
            other => conn_err!(
                ConnectErrorKind::InvalidInstanceName,
                "unrecognized ip type \"{other}\"; expected PRIMARY/PUBLIC, PRIVATE, or PSC"
            ),
        }
    }
}

/// Parses a comma-separated `ipTypes` preference list as documented for
/// the `ipTypes` configuration key. Defaults to `PRIMARY,PRIVATE` when
/// `s` is empty.
pub fn parse_ip_type_preferences(s: &str) -> Result<Vec<IpType>, ConnectError> {
    if s.trim().is_empty() {
        return Ok(vec![IpType::Primary, IpType::Private]);
    }
    s.split(',').map(|part| IpType::from_str(part)).collect()
}

/// Determines whether a database-user access token is required for a
/// connection and whether the target engine's IAM support must be verified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthType {
    Password,
    Iam,
}
