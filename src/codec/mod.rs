//! Codec module - typed encoding for operation payloads.
//!
//! Frames carry payloads as opaque bytes. Handlers and providers that
//! agree on a structured layout for a kind use [`MsgPackCodec`], as the
//! control device does for volume creation.
//!
//! ```
//! use fsvirt::codec::MsgPackCodec;
//! use fsvirt::dispatch::CreateVolumeParams;
//!
//! let params = CreateVolumeParams {
//!     identity: "V1".to_string(),
//!     security_descriptor: Vec::new(),
//! };
//! let payload = MsgPackCodec::encode_payload(&params).unwrap();
//! let decoded: CreateVolumeParams = MsgPackCodec::decode(&payload).unwrap();
//! assert_eq!(decoded, params);
//! ```

mod msgpack;

pub use msgpack::MsgPackCodec;
