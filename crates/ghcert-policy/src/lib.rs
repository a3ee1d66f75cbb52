// ABOUTME: Trust policy, policy signature integrity and principal derivation for ghcert.
// ABOUTME: Shared by the issuance server and the CLI so both agree on what a valid policy is.

pub mod error;
pub mod integrity;
pub mod policy;
pub mod principal;
pub mod signers;

pub use error::{PolicyError, PolicyIntegrityError, Result};
pub use integrity::{
    canonical_payload, sign_policy, verify_policy_integrity, IntegrityMode, PolicySignature,
    SIGNED_FIELDS,
};
pub use policy::{OidcSettings, TrustPolicy, DEFAULT_CERT_VALIDITY_HOURS, DEFAULT_TARGET_HOST};
pub use principal::{derive_principal, PrincipalSource, UserInfo};
pub use signers::{load_trusted_signers, parse_trusted_signers};
