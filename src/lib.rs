//! # rewiring
//!
//! Page rewiring for self-tuning adaptive radix trees.
//!
//! Converting a tree node between storage layouts normally means copying its
//! contents into fresh memory. Rewiring instead points virtual pages at
//! different physical pages, so a node's child-pointer arrays can be
//! rearranged, or squeezed onto fewer physical pages, without moving data.
//!
//! - [`PageSqueezer`] decides how logical child-pointer pages pack onto
//!   physical pages.
//! - A [`RegionFactory`] hands out [`RewiringRegion`]s, either
//!   [`InProcessRegion`]s backed by a memfd or [`ModuleAssistedRegion`]s
//!   backed by the rewiring kernel module.
//! - [`Reservation`] pins the virtual range a region lives in.
//!
//! ## Example
//!
//! ```no_run
//! use rewiring::{PageSqueezer, RegionFactory, RewireConfig, RewiringRegion, SlotSet};
//! use rewiring::region::InProcessFactory;
//!
//! # fn main() -> rewiring::Result<()> {
//! let mut squeezer = PageSqueezer::new();
//! squeezer.squeeze(0x00, &SlotSet::from_range(0..256))?;
//! squeezer.squeeze(0x02, &SlotSet::from_range(256..512))?;
//! let packed = squeezer.finish();
//! assert_eq!(packed.num_pages(), 1);
//!
//! let factory = InProcessFactory::new(&RewireConfig::default())?;
//! let mut region = factory.create_region(2)?;
//! region.init(&packed.slot_mappings())?;
//! # Ok(())
//! # }
//! ```
//!
//! Linux only.

#![deny(unsafe_op_in_unsafe_fn)]
#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod region;
pub mod reservation;
pub mod slots;
pub mod squeezer;

pub use config::{Backend, DeviceErrorPolicy, RewireConfig};
pub use error::{Result, RewireError};
pub use region::{
    AnyFactory, AnyRegion, InProcessFactory, InProcessRegion, ModuleAssistedFactory,
    ModuleAssistedRegion, RegionFactory, RewiringRegion, SlotMapping, VirtualRegion, PAGE_SIZE,
};
pub use reservation::Reservation;
pub use slots::{SlotSet, SLOTS_PER_PAGE};
pub use squeezer::{PageSqueezer, SqueezedMapping, LOGICAL_PAGES, UNMAPPED};

#[cfg(test)]
mod proptests;
