pub mod descriptor;
pub mod proximity;
pub mod resolve;

pub use descriptor::{
    Candidate, ElementDescriptor, Locator, LocatorAttempt, NotFound, Resolution, ResolveOptions,
    ResolvedElement,
};
pub use proximity::{DomNode, ProximityDirection, ProximityQuery};
pub use resolve::{find_by_proximity, find_first_visible, get_bounding_center};
