//! # Events Module
//!
//! Progress reporting for scan runs.
//!
//! The core library emits events through a crossbeam channel; the CLI renders
//! them as progress bars. Sends never block the pipeline on an absent reader.
//!
//! ## Example
//! ```rust,ignore
//! let (sender, receiver) = EventChannel::new();
//!
//! std::thread::spawn(move || {
//!     for event in receiver.iter() {
//!         match event {
//!             Event::Listing(ListingEvent::Page(p)) => println!("{} items", p.total_items),
//!             Event::Download(DownloadEvent::Progress(p)) => println!("{}/{}", p.completed, p.total),
//!             _ => {}
//!         }
//!     }
//! });
//!
//! ScanPipeline::new(config, &store, fetcher).with_events(sender).run()?;
//! ```

mod channel;
mod types;

pub use channel::{null_sender, EventChannel, EventReceiver, EventSender};
pub use types::*;
