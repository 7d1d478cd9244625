//! Property-Based Tests for Tenant Isolation Invariants
//!
//! These tests verify that the isolation invariants hold for arbitrary inputs:
//! 1. INJECTION: the injected claim is exactly `{"TenantID": [T]}`
//! 2. SCOPING: a credential for T reaches `bucket/T/*` and nothing under `U/`
//! 3. FAIL-CLOSED: unsafe tenant values never yield a claim or an allow
//!
//! Uses proptest for property-based testing with arbitrary inputs.

use proptest::prelude::*;
use serde_json::{json, Map};
use tenant_abac_core::{
    session_tags_from_value, AccessRequest, ClaimInjector, LoginEvent, PolicyDocument,
    SessionTags, TenantId, DEFAULT_CLAIMS_NAMESPACE,
};

const BUCKET: &str = "tenant-data";

fn login(user: &str) -> LoginEvent {
    LoginEvent {
        user_id: format!("auth0|{}", user),
        client_id: "client-123".into(),
        connection: None,
    }
}

fn read_policy() -> PolicyDocument {
    PolicyDocument::tenant_scoped(BUCKET, &["s3:GetObject".to_string()]).unwrap()
}

fn tags_for(tenant: &str) -> SessionTags {
    SessionTags::for_tenant(&TenantId::parse(tenant).unwrap())
}

// =============================================================================
// INVARIANT 1: INJECTION - claim is exactly [T]
// =============================================================================

proptest! {
    /// The namespace claim carries exactly one value, equal to the configured tenant
    #[test]
    fn prop_injected_claim_is_exact(
        tenant in "[A-Za-z0-9_-]{1,64}",
        user in "[a-z0-9]{1,16}",
    ) {
        let injector = ClaimInjector::new(Some(tenant.clone()), DEFAULT_CLAIMS_NAMESPACE);
        let mut claims = Map::new();
        injector.apply(&login(&user), &mut claims).unwrap();

        prop_assert_eq!(
            claims[DEFAULT_CLAIMS_NAMESPACE].clone(),
            json!({"principal_tags": {"TenantID": [tenant.clone()]}})
        );

        // INVARIANT: the claim round-trips through the broker's parser unchanged
        let tags = session_tags_from_value(&claims[DEFAULT_CLAIMS_NAMESPACE]).unwrap();
        prop_assert_eq!(tags.get("TenantID"), Some(tenant.as_str()));
        prop_assert_eq!(tags.len(), 1);
    }

    /// Pre-existing namespace content never survives injection
    #[test]
    fn prop_injection_replaces_forged_claims(
        tenant in "[A-Za-z0-9_-]{1,32}",
        forged in "[A-Za-z0-9_-]{1,32}",
    ) {
        prop_assume!(tenant != forged);

        let injector = ClaimInjector::new(Some(tenant.clone()), DEFAULT_CLAIMS_NAMESPACE);
        let mut claims = Map::new();
        claims.insert(
            DEFAULT_CLAIMS_NAMESPACE.to_string(),
            json!({"principal_tags": {"TenantID": [forged], "Role": ["admin"]}}),
        );
        injector.apply(&login("mallory"), &mut claims).unwrap();

        prop_assert_eq!(
            claims[DEFAULT_CLAIMS_NAMESPACE].clone(),
            json!({"principal_tags": {"TenantID": [tenant]}})
        );
    }

    /// Any tenant outside the safe alphabet fails injection and leaves claims untouched
    #[test]
    fn prop_unsafe_tenant_never_injected(
        prefix in "[A-Za-z0-9]{0,8}",
        bad in "[/*?$ {}.:]",
        suffix in "[A-Za-z0-9]{0,8}",
    ) {
        let tenant = format!("{}{}{}", prefix, bad, suffix);
        let injector = ClaimInjector::new(Some(tenant), DEFAULT_CLAIMS_NAMESPACE);
        let mut claims = Map::new();

        prop_assert!(injector.apply(&login("alice"), &mut claims).is_err());
        prop_assert!(claims.is_empty());
    }
}

// =============================================================================
// INVARIANT 2: SCOPING - own prefix only
// =============================================================================

proptest! {
    /// T reaches every key under `T/`
    #[test]
    fn prop_own_prefix_allowed(
        tenant in "[A-Za-z0-9_-]{1,32}",
        key in "[A-Za-z0-9_./-]{0,48}",
    ) {
        let request = AccessRequest::object("s3:GetObject", BUCKET, &format!("{}/{}", tenant, key)).unwrap();
        prop_assert!(read_policy().evaluate(&request, &tags_for(&tenant)).is_allowed());
    }

    /// T never reaches a key whose first segment is some other U
    #[test]
    fn prop_other_prefix_denied(
        tenant in "[A-Za-z0-9_-]{1,32}",
        other in "[A-Za-z0-9_-]{1,32}",
        key in "[A-Za-z0-9_./-]{0,48}",
    ) {
        prop_assume!(tenant != other);

        let request = AccessRequest::object("s3:GetObject", BUCKET, &format!("{}/{}", other, key)).unwrap();
        let result = read_policy().authorize(&request, &tags_for(&tenant));
        prop_assert!(result.is_err(), "{} reached {}/", tenant, other);
    }

    /// A key that merely starts with T's id but is a different segment is denied
    #[test]
    fn prop_prefix_extension_denied(
        tenant in "[A-Za-z0-9_-]{1,32}",
        extension in "[A-Za-z0-9_-]{1,8}",
        key in "[A-Za-z0-9_.-]{0,16}",
    ) {
        let request = AccessRequest::object(
            "s3:GetObject",
            BUCKET,
            &format!("{}{}/{}", tenant, extension, key),
        )
        .unwrap();
        prop_assert!(!read_policy().evaluate(&request, &tags_for(&tenant)).is_allowed());
    }

    /// A bucket carrying path segments cannot move T's prefix into the bucket
    #[test]
    fn prop_bucket_with_segments_rejected(
        tenant in "[A-Za-z0-9_-]{1,32}",
        suffix in "(/[a-z0-9.]{1,8}){1,3}",
        key in "[A-Za-z0-9_.-]{1,16}",
    ) {
        let bucket = format!("{}/{}{}", BUCKET, tenant, suffix);
        prop_assert!(AccessRequest::object("s3:GetObject", &bucket, &key).is_err());
        let bucket = format!("{}/{}", BUCKET, tenant);
        prop_assert!(AccessRequest::object("s3:GetObject", &bucket, &key).is_err());
    }
}

// =============================================================================
// INVARIANT 3: FAIL-CLOSED - no tag, no access
// =============================================================================

proptest! {
    /// Without a tenant tag nothing is reachable
    #[test]
    fn prop_untagged_credential_denied(key in "[A-Za-z0-9_./-]{0,48}") {
        let request = AccessRequest::object("s3:GetObject", BUCKET, &key).unwrap();
        prop_assert!(!read_policy().evaluate(&request, &SessionTags::new()).is_allowed());
    }

    /// Multi-valued tenant claims are rejected before they become tags
    #[test]
    fn prop_multi_valued_tenant_rejected(
        values in prop::collection::vec("[A-Za-z0-9_-]{1,16}", 2..5),
    ) {
        let claim = json!({"principal_tags": {"TenantID": values}});
        prop_assert!(session_tags_from_value(&claim).is_err());
    }
}
