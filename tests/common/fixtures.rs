//! Static fixtures shared across harnesses.

/// An ingest document in the on-disk shape, one profile.
pub const SAMPLE_CONFIG_JSON: &str = r#"{
    "sdCardMappings": {
        "CARD1": { "name": "Insta360 X3", "sourceDirs": ["DCIM"], "destination": "/archive/trip1" }
    },
    "ignoredExtensions": [".thm"],
    "timezone": "Europe/Amsterdam",
    "destinationConfig": { "type": "local", "path": "/archive" }
}"#;

/// Stand-in media payloads. Distinct lengths so size checks can tell them apart.
pub const CLIP_A: &[u8] = b"ftypisom-clip-a-0123456789";
pub const CLIP_C: &[u8] = b"insv-native-clip-c-0123456789abcdef";
pub const THUMBNAIL: &[u8] = b"thm";
