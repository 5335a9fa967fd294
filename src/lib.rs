pub mod acquisition;
pub mod advisory;
pub mod bbox;
pub mod config;
pub mod decoder;
pub mod detection;
pub mod detector;
pub mod error;
pub mod flow;
pub mod frame;
pub mod guidance;
pub mod hand;
pub mod image;
pub mod math;
pub mod motion;
pub mod pipeline;
pub mod revalidation;
pub mod state;
pub mod tracker;

pub use bbox::{BBox, Ltrb, Xywh};
pub use config::TrackerConfig;
pub use detection::{ClassLabels, DetectionBox};
pub use detector::{Detector, Inference};
pub use error::Error;
pub use frame::Frame;
pub use hand::HandPose;
pub use motion::OrientationSample;
pub use pipeline::TrackingPipeline;
pub use state::{TrackPhase, TrackState};
pub use tracker::{FrameOutput, SensorEvent, TargetTracker, TrackEvent, TrackSnapshot, TrackedBox};
