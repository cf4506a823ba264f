// Protocol constants shared by the verifier and its adapters.

/// Domain separation prefix for every message signed by a space, delegate or handle key.
pub const SPACES_SIGNED_MSG_PREFIX: &[u8] = b"\x17Spaces Signed Message:\n";

/// Number of blocks a height must trail the newest anchor before it is final.
pub const COMMITMENT_FINALITY_INTERVAL: u32 = 144;

/// Current certificate version.
pub const CERTIFICATE_VERSION: u8 = 2;

/// Version of the core contract adapters are compiled against.
///
/// Bump whenever a wire format or a boundary-visible semantic changes.
pub const API_VERSION: u32 = 2;
