//! Pure routing decision for a connection request
//!
//! No I/O: given the source descriptor, the request and the options, pick
//! the path or fail before anything is sent to the backend.

use strand_core::{Result, SourceDetails, StrandError};

use crate::flow::ConnectRequest;
use crate::options::FlowOptions;

/// How a source connection gets established
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectPath {
    /// Local development: a pasted token stands in for OAuth
    LocalToken,
    /// Hand the user to the identity provider
    OAuthRedirect,
    /// Create collection and source connection right away
    Direct,
}

impl std::fmt::Display for ConnectPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::LocalToken => write!(f, "local-token"),
            Self::OAuthRedirect => write!(f, "oauth-redirect"),
            Self::Direct => write!(f, "direct"),
        }
    }
}

pub fn decide(source: &SourceDetails, request: &ConnectRequest, options: &FlowOptions) -> Result<ConnectPath> {
    let has_local_token = request
        .local_token
        .as_deref()
        .is_some_and(|token| !token.trim().is_empty());
    if has_local_token && options.allows_local_token(&source.short_name) {
        return Ok(ConnectPath::LocalToken);
    }

    if source.auth_type.is_oauth2() {
        return Ok(ConnectPath::OAuthRedirect);
    }

    if source.requires_configuration() {
        let fields = match &request.auth_fields {
            Some(fields) if !fields.is_empty() => fields,
            _ => return Err(StrandError::ConfigurationRequired(source.short_name.clone())),
        };
        let missing = fields.missing_required(source);
        if !missing.is_empty() {
            return Err(StrandError::Validation(format!(
                "{} is missing required fields: {}",
                source.display_name(),
                missing.join(", ")
            )));
        }
    }

    Ok(ConnectPath::Direct)
}

#[cfg(test)]
mod tests {
    use super::*;
    use strand_core::{AuthField, AuthFieldValues, AuthType, CollectionDetails};

    fn request(short_name: &str) -> ConnectRequest {
        ConnectRequest::new(short_name, CollectionDetails::new("Docs"))
    }

    fn api_key_source() -> SourceDetails {
        SourceDetails::new("stripe", AuthType::ApiKey).with_field(AuthField {
            name: "api_key".to_string(),
            required: true,
            secret: true,
            ..Default::default()
        })
    }

    #[test]
    fn test_no_auth_is_direct() {
        let source = SourceDetails::new("rss", AuthType::None);
        let path = decide(&source, &request("rss"), &FlowOptions::default()).unwrap();
        assert_eq!(path, ConnectPath::Direct);
    }

    #[test]
    fn test_basic_without_required_fields_is_direct() {
        let source = SourceDetails::new("ftp", AuthType::Basic);
        let path = decide(&source, &request("ftp"), &FlowOptions::default()).unwrap();
        assert_eq!(path, ConnectPath::Direct);
    }

    #[test]
    fn test_any_oauth2_variant_redirects() {
        for variant in ["oauth2", "oauth2_with_refresh", "oauth2_with_refresh_rotating"] {
            let source = SourceDetails::new("notion", AuthType::from(variant.to_string()));
            let path = decide(&source, &request("notion"), &FlowOptions::default()).unwrap();
            assert_eq!(path, ConnectPath::OAuthRedirect);
        }
    }

    #[test]
    fn test_oauth2_wins_over_required_fields() {
        let source = SourceDetails::new("gmail", AuthType::from("oauth2".to_string()))
            .with_field(AuthField {
                name: "client_id".to_string(),
                required: true,
                ..Default::default()
            });
        let path = decide(&source, &request("gmail"), &FlowOptions::default()).unwrap();
        assert_eq!(path, ConnectPath::OAuthRedirect);
    }

    #[test]
    fn test_required_fields_without_values_fail() {
        let err = decide(&api_key_source(), &request("stripe"), &FlowOptions::default()).unwrap_err();
        assert!(matches!(err, StrandError::ConfigurationRequired(ref s) if s == "stripe"));

        let empty = request("stripe").with_auth_fields(AuthFieldValues::new());
        let err = decide(&api_key_source(), &empty, &FlowOptions::default()).unwrap_err();
        assert!(matches!(err, StrandError::ConfigurationRequired(_)));
    }

    #[test]
    fn test_partial_fields_are_validation_error() {
        let partial = request("stripe").with_auth_fields(AuthFieldValues::new().with("other", "x"));
        let err = decide(&api_key_source(), &partial, &FlowOptions::default()).unwrap_err();
        match err {
            StrandError::Validation(message) => assert!(message.contains("api_key")),
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_supplied_fields_are_direct() {
        let complete = request("stripe").with_auth_fields(AuthFieldValues::new().with("api_key", "sk"));
        let path = decide(&api_key_source(), &complete, &FlowOptions::default()).unwrap();
        assert_eq!(path, ConnectPath::Direct);
    }

    #[test]
    fn test_local_token_bypass() {
        let slack = SourceDetails::new("slack", AuthType::from("oauth2".to_string()));
        let with_token = request("slack").with_local_token("xoxb-local");
        let local = FlowOptions {
            local_development: true,
            ..FlowOptions::default()
        };

        assert_eq!(
            decide(&slack, &with_token, &local).unwrap(),
            ConnectPath::LocalToken
        );
        // Off outside local development
        assert_eq!(
            decide(&slack, &with_token, &FlowOptions::default()).unwrap(),
            ConnectPath::OAuthRedirect
        );
        // Blank tokens do not count
        assert_eq!(
            decide(&slack, &request("slack").with_local_token("  "), &local).unwrap(),
            ConnectPath::OAuthRedirect
        );
    }
}
