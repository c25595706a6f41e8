//! Spec validation
//!
//! Rules for a fresh spec, plus transition rules checked against the spec
//! of the last successful pass.

use crate::error::ValidationError;
use crate::resource::ReplicaSetSpec;
use replset_topology::modifiers::AdditionalArgsModifier;
use std::collections::{BTreeMap, HashSet};

/// Validate `spec`, and the change from `last` when there is one
///
/// # Errors
/// The first violated rule
pub fn validate(spec: &ReplicaSetSpec, last: Option<&ReplicaSetSpec>) -> Result<(), ValidationError> {
    validate_spec(spec)?;
    if let Some(last) = last {
        validate_update(spec, last)?;
    }
    Ok(())
}

/// Rules every spec must satisfy on its own
///
/// # Errors
/// The first violated rule
pub fn validate_spec(spec: &ReplicaSetSpec) -> Result<(), ValidationError> {
    validate_arbiters(spec)?;
    validate_auth_modes(spec)?;
    validate_users(spec)?;
    AdditionalArgsModifier::new(&spec.additional_mongod_config)
        .map_err(|e| ValidationError::AdditionalConfig(e.to_string()))?;
    Ok(())
}

/// Transition rules
///
/// # Errors
/// [`ValidationError::TlsDisabled`] when TLS would be switched off
pub fn validate_update(spec: &ReplicaSetSpec, last: &ReplicaSetSpec) -> Result<(), ValidationError> {
    if last.security.tls.enabled && !spec.security.tls.enabled {
        return Err(ValidationError::TlsDisabled);
    }
    Ok(())
}

fn validate_arbiters(spec: &ReplicaSetSpec) -> Result<(), ValidationError> {
    if spec.arbiters < 0 {
        return Err(ValidationError::NegativeArbiters(spec.arbiters));
    }
    if spec.arbiter_count() >= spec.members {
        return Err(ValidationError::TooManyArbiters {
            arbiters: spec.arbiters,
            members: spec.members,
        });
    }
    Ok(())
}

fn validate_auth_modes(spec: &ReplicaSetSpec) -> Result<(), ValidationError> {
    let mut seen = HashSet::new();
    for mode in &spec.security.authentication.modes {
        if !seen.insert(mode.mechanism()) {
            return Err(ValidationError::DuplicateAuthMode(mode.mechanism().to_string()));
        }
    }
    Ok(())
}

fn validate_users(spec: &ReplicaSetSpec) -> Result<(), ValidationError> {
    let mut scram_secrets: BTreeMap<String, &str> = BTreeMap::new();
    let mut connection_secrets: BTreeMap<String, &str> = BTreeMap::new();
    for user in &spec.users {
        if user.password_secret_ref.name.is_empty() {
            return Err(ValidationError::MissingUserField {
                user: user.name.clone(),
                field: "passwordSecretRef.name",
            });
        }
        if user.scram_credentials_secret_name.is_empty() {
            return Err(ValidationError::MissingUserField {
                user: user.name.clone(),
                field: "scramCredentialsSecretName",
            });
        }
        if let Some(first) = scram_secrets.insert(user.scram_credentials_secret(), &user.name) {
            return Err(ValidationError::SharedSecret {
                kind: "scram credentials",
                secret: user.scram_credentials_secret(),
                first: first.to_string(),
                second: user.name.clone(),
            });
        }
        // resource name does not matter for collisions between users of one resource
        let connection = user.connection_string_secret("");
        if let Some(first) = connection_secrets.insert(connection.clone(), &user.name) {
            return Err(ValidationError::SharedSecret {
                kind: "connection string",
                secret: connection,
                first: first.to_string(),
                second: user.name.clone(),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::{AuthMode, SecretKeyRef, UserSpec};
    use serde_json::json;

    fn spec() -> ReplicaSetSpec {
        ReplicaSetSpec {
            members: 3,
            version: "6.0.5".into(),
            ..ReplicaSetSpec::default()
        }
    }

    fn user(name: &str, scram: &str) -> UserSpec {
        UserSpec {
            name: name.into(),
            db: "admin".into(),
            password_secret_ref: SecretKeyRef::new(format!("{name}-password")),
            scram_credentials_secret_name: scram.into(),
            ..UserSpec::default()
        }
    }

    #[test]
    fn arbiters_must_leave_a_data_member() {
        let mut s = spec();
        s.arbiters = 2;
        assert!(validate(&s, None).is_ok());
        s.arbiters = 3;
        assert!(matches!(validate(&s, None), Err(ValidationError::TooManyArbiters { .. })));
        s.arbiters = -1;
        assert_eq!(validate(&s, None), Err(ValidationError::NegativeArbiters(-1)));
    }

    #[test]
    fn zero_members_is_rejected() {
        let mut s = spec();
        s.members = 0;
        assert_eq!(
            validate(&s, None),
            Err(ValidationError::TooManyArbiters { arbiters: 0, members: 0 })
        );
    }

    #[test]
    fn duplicate_modes_after_normalization() {
        let mut s = spec();
        s.security.authentication.modes = vec![AuthMode::Scram, AuthMode::ScramSha256];
        assert_eq!(
            validate(&s, None),
            Err(ValidationError::DuplicateAuthMode("SCRAM-SHA-256".into()))
        );
        s.security.authentication.modes = vec![AuthMode::Scram, AuthMode::ScramSha1];
        assert!(validate(&s, None).is_ok());
    }

    #[test]
    fn users_need_secrets() {
        let mut s = spec();
        s.users = vec![user("app", "")];
        assert!(matches!(
            validate(&s, None),
            Err(ValidationError::MissingUserField { field: "scramCredentialsSecretName", .. })
        ));
        s.users = vec![user("app", "same"), user("other", "same")];
        assert!(matches!(validate(&s, None), Err(ValidationError::SharedSecret { .. })));
        s.users = vec![user("app", "app"), user("other", "other")];
        assert!(validate(&s, None).is_ok());
    }

    #[test]
    fn explicit_connection_secret_collisions() {
        let mut s = spec();
        let mut a = user("a", "a");
        let mut b = user("b", "b");
        a.connection_string_secret_name = Some("shared".into());
        b.connection_string_secret_name = Some("shared".into());
        s.users = vec![a, b];
        assert!(matches!(
            validate(&s, None),
            Err(ValidationError::SharedSecret { kind: "connection string", .. })
        ));
    }

    #[test]
    fn tls_cannot_be_disabled() {
        let mut last = spec();
        last.security.tls.enabled = true;
        assert_eq!(validate(&spec(), Some(&last)), Err(ValidationError::TlsDisabled));
        assert!(validate(&last, Some(&spec())).is_ok());
    }

    #[test]
    fn additional_config_must_be_sectioned() {
        let mut s = spec();
        s.additional_mongod_config = json!({"net": 1});
        assert!(matches!(validate(&s, None), Err(ValidationError::AdditionalConfig(_))));
        s.additional_mongod_config = json!({"quiet": true, "net": {"bindIpAll": true}});
        assert!(validate(&s, None).is_ok());
    }
}
