pub mod audit;
pub mod config;
pub mod dates;
pub mod encoder;
pub mod entry;
pub mod lock;
pub mod motioneye;
pub mod paths;
pub mod pipeline;
pub mod prune;
pub mod reconcile;
pub mod remote;
pub mod timelapse;
pub mod upload;
pub mod util;
pub mod warn;
