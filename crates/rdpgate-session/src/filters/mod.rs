//! Deep-inspection filters for the static virtual channels the proxy
//! understands: clipboard (cliprdr), device redirection (rdpdr) and
//! RemoteApp (rail). The dynamic channel filter lives in rdpgate-dvc.
//!
//! Each filter implements [`rdpgate_svc::ChannelFilter`]: it receives raw
//! chunks per direction and returns effect values; it never talks to a
//! transport itself.

pub mod cliprdr;
pub mod rail;
pub mod rdpdr;

pub use cliprdr::{CliprdrFilter, CLIPRDR_CHANNEL_NAME};
pub use rail::{IdentityWindowIdMapper, RailFilter, WindowIdMapper, RAIL_CHANNEL_NAME};
pub use rdpdr::{RdpdrFilter, RDPDR_CHANNEL_NAME};
