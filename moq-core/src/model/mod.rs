mod broadcast;
mod group;
mod origin;
mod produce;
mod state;
mod track;
mod waiter;

pub use broadcast::*;
pub use group::*;
pub use origin::*;
pub use produce::*;
pub use track::*;

pub(crate) use state::*;
pub(crate) use waiter::*;
