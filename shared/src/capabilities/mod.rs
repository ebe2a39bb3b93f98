pub mod camera;
pub mod kv;
pub mod vision;

pub use self::camera::{
    Camera, CameraError, CameraFacing, CameraOperation, CameraOutput, CameraResult,
    CapturedFrame, FrameData, StreamConfig,
};
pub use self::kv::{KeyValue, KvError, KvKey, KvOperation, KvOutput, KvResult};
pub use self::vision::{Vision, VisionError, VisionOperation, VisionResponse, VisionResult};

pub use crux_core::render::Render;

use crate::app::App;
use crate::event::Event;

#[derive(crux_core::macros::Effect)]
#[effect(app = "App")]
pub struct Capabilities {
    pub render: Render<Event>,
    pub camera: Camera<Event>,
    pub vision: Vision<Event>,
    pub key_value: KeyValue<Event>,
}
