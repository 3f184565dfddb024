//! Correlation identifiers
//!
//! Request ids are random (version 4) UUIDs in their hyphenated text form,
//! e.g. `0f8fad5b-d9cb-469f-a165-70867728950e`.

use uuid::{Uuid, Variant};

const HYPHENATED_LEN: usize = 36;

/// Generate a fresh request id
pub fn new_request_id() -> String {
    Uuid::new_v4().hyphenated().to_string()
}

/// Returns true if `id` is a hyphenated version 4 UUID with the RFC 4122 variant
pub fn is_uuid4(id: &str) -> bool {
    // try_parse also accepts the simple, braced and urn forms
    if id.len() != HYPHENATED_LEN {
        return false;
    }

    match Uuid::try_parse(id) {
        Ok(uuid) => uuid.get_version_num() == 4 && uuid.get_variant() == Variant::RFC4122,
        Err(_) => false,
    }
}
