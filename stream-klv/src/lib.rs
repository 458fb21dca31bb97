//! Telemetry extraction for MPEG-TS streams carrying UAS Datalink KLV.
//!
//! The crate turns raw transport stream bytes into [`TelemetrySample`]s and
//! derives ground footprints from them.
//!
//! ```text
//! datagrams ─▶ PacketAligner ─▶ PesAssembler ─▶ KlvScanner ─▶ TelemetrySample
//!                                                                  │
//!                              GeometryOperatorList ◀─ summarize ◀─┘
//! ```
//!
//! # Example
//!
//! ```rust
//! use stream_klv::{KlvExtractor, PacketAligner};
//!
//! let mut aligner = PacketAligner::new();
//! let mut extractor = KlvExtractor::new();
//! let mut samples = Vec::new();
//!
//! let datagram = [0x47u8, 0x1F, 0xFF, 0x10].repeat(47);
//! aligner
//!     .push(&datagram, |packet| extractor.push_packet(packet, &mut samples))
//!     .unwrap();
//! assert!(samples.is_empty());
//! ```

pub mod encode;
pub mod error;
pub mod extractor;
pub mod geometry;
pub mod klv;
pub mod packet;
pub mod pes;
pub mod telemetry;

pub use error::KlvError;
pub use extractor::{ExtractorStats, KlvExtractor, TelemetryIter};
pub use geometry::{
    is_valid, summarize, ChunkGeometry, Context, GeometryOperator, GeometryOperatorList,
};
pub use klv::{KlvScanner, KlvUnit, UAS_LOCAL_SET_KEY};
pub use packet::{PacketAligner, TsPacket, TsPacketIterator, SYNC_BYTE, TS_PACKET_SIZE};
pub use telemetry::{LatLon, TelemetrySample};
