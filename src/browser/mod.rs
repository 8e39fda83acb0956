pub mod cdp;
pub mod chrome;
pub mod chromium;
pub mod connection;
pub mod driver;
pub mod js;
pub mod profile;

pub use connection::{BrowserBackend, ChromeLauncher, Connection, Launcher, PageSource};
pub use driver::{HitTest, Key, PageDriver, PageTarget, PasteResult, Point, Rect};
pub use profile::ProfileLock;
