//! Global Virtual Time: the per-node local reduction (§4.G) and the
//! cross-node Mattern coloured-token protocol (§4.H).
pub mod local;
pub mod mattern;

pub use local::LocalGvt;
pub use mattern::{Color, MatternNode, TokenOutcome, TokenPayload};
