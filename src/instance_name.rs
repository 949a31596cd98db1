//
// Copyright (c) 2024, 2025 Oracle and/or its affiliates. All rights reserved.
//
// Licensed under the Universal Permissive License v 1.0 as shown at
//  https://oss.oracle.com/licenses/upl/
//
use crate::error::{conn_err, ConnectError, ConnectErrorKind};
use std::fmt;

/// A parsed, immutable `project:region:instance` identifier.
///
/// Also accepts the domain-scoped form `domain:project:region:instance`,
/// where `domain` is itself a colon-qualified project (e.g.
/// `example.com:my-project`). In that form `project` below holds
/// `domain:project` reassembled, and `domain_project` holds just the
/// first segment for callers that need it split out.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InstanceName {
    project: String,
    region: String,
    instance: String,
    domain_project: Option<String>,
}

impl InstanceName {
    /// Parses `P:R:I` or `D:P:R:I`. Fails with `InvalidInstanceName` if the
    /// shape does not match, any part is empty, or any part contains a
    /// non-ASCII control character.
    pub fn parse(s: &str) -> Result<InstanceName, ConnectError> {
        let parts: Vec<&str> = s.split(':').collect();
        let (domain_project, project, region, instance) = match parts.as_slice() {
            [p, r, i] => (None, (*p).to_string(), (*r).to_string(), (*i).to_string()),
            [d, p, r, i] => (
                Some((*d).to_string()),
                format!("{d}:{p}"),
                (*r).to_string(),
                (*i).to_string(),
            ),
            _ => {
                return conn_err!(
                    ConnectErrorKind::InvalidInstanceName,
                    "instance name \"{s}\" must have the form project:region:instance \
                     or domain:project:region:instance"
                )
            }
        };

        for part in [&project, &region, &instance] {
            if part.is_empty() {
                return conn_err!(
                    ConnectErrorKind::InvalidInstanceName,
                    "instance name \"{s}\" has an empty component"
                );
            }
            if part.chars().any(|c| c.is_ascii_control()) {
                return conn_err!(
                    ConnectErrorKind::InvalidInstanceName,
                    "instance name \"{s}\" contains a control character"
                );
            }
        }

        Ok(InstanceName {
            project,
            region,
            instance,
            domain_project,
        })
    }

    pub fn project(&self) -> &str {
        &self.project
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    pub fn instance(&self) -> &str {
        &self.instance
    }

    pub fn domain_project(&self) -> Option<&str> {
        self.domain_project.as_deref()
    }
}

impl fmt::Display for InstanceName {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}:{}:{}", self.project, self.region, self.instance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_three_part_name() {
        let n = InstanceName::parse("proj:region1:inst").unwrap();
        assert_eq!(n.project(), "proj");
        assert_eq!(n.region(), "region1");
        assert_eq!(n.instance(), "inst");
        assert_eq!(n.domain_project(), None);
    }

    #[test]
    fn round_trips_to_canonical_string() {
        let s = "my-project:us-central1:my-instance";
        let n = InstanceName::parse(s).unwrap();
        assert_eq!(n.to_string(), s);
    }

    #[test]
    fn parses_domain_scoped_project() {
        let n = InstanceName::parse("example.com:proj:region1:inst").unwrap();
        assert_eq!(n.project(), "example.com:proj");
        assert_eq!(n.domain_project(), Some("example.com"));
        assert_eq!(n.to_string(), "example.com:proj:region1:inst");
    }

    #[test]
    fn rejects_wrong_part_count() {
        assert!(InstanceName::parse("only:two").is_err());
        assert!(InstanceName::parse("way:too:many:parts:here").is_err());
    }

    #[test]
    fn rejects_empty_component() {
        assert!(InstanceName::parse("proj::inst").is_err());
    }

    #[test]
    fn rejects_control_characters() {
        assert!(InstanceName::parse("proj:reg\u{0007}ion:inst").is_err());
    }
}
