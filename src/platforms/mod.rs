pub mod traits;
pub mod wechat;

pub use traits::{PlatformInfo, SiteProfile};
