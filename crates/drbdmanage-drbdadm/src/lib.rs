//! # drbdmanage-drbdadm: the DRBD admin interface
//!
//! Renders `.res` configuration files from the domain model and invokes the
//! external `drbdadm`/`drbdsetup` tools that apply them.

mod admin;
mod error;
mod res_writer;

pub use admin::DrbdAdm;
pub use error::DrbdAdmError;
pub use res_writer::{render_resource_config, NodeView};
