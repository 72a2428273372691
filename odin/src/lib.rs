//! # odin
//!
//! A library implementing the host side of the ODIN download-mode
//! firmware-flashing protocol used by a family of Samsung-style mobile
//! devices.
//!
//! This crate is the protocol engine only: the framed command/data state
//! machine, the PIT (Partition Information Table) binary codec, and the
//! flash-transfer sequencer with per-packet acknowledgement and
//! version-dependent sizing. It knows nothing about interactive shells,
//! progress rendering, or the filesystem — those live in the `odin-cli`
//! binary built on top of this crate.
//!
//! ## Supported Platforms
//!
//! - **Native** (default, `usb` feature): Linux, macOS, Windows via the
//!   `rusb` crate talking directly to the device's bulk USB endpoints.
//!
//! ## Example
//!
//! ```rust,no_run
//! use odin::flash::{FileSource, NullProgress};
//! use odin::session::Session;
//! use odin::transport::usb::UsbTransport;
//!
//! fn main() -> odin::Result<()> {
//!     let transport = UsbTransport::discover_default()?;
//!     let mut session = Session::new(transport);
//!     session.begin_session(false)?;
//!     session.get_pit()?;
//!
//!     let mut source = FileSource::open("/path/to/RECOVERY.img")?;
//!     session.flash(&mut source, "RECOVERY", &mut NullProgress, false, false)?;
//!
//!     session.end_session()?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod flash;
pub mod frame;
pub mod pit;
pub mod session;
pub mod transport;

#[cfg(any(test, feature = "testing"))]
pub mod testing;
#[cfg(not(any(test, feature = "testing")))]
mod testing;

pub use error::{Error, Result};
pub use frame::{CommandFrame, decode_u32_at};
pub use pit::{PartitionEntry, Pit, PitHeader, format_partition_table, parse_pit};
pub use session::Session;
pub use transport::Transport;
