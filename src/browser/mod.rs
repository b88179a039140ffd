pub mod chrome;
pub mod fetcher;
pub mod pool;
pub mod session;

pub use chrome::ChromeFactory;
pub use fetcher::{PageFetcher, RenderedPage};
pub use pool::BrowserPool;
pub use session::{BrowserSession, SessionFactory};
