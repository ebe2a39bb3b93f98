#![allow(dead_code)]

use crux_core::capability::Operation;
use crux_core::testing::AppTester;
use crux_core::Request;
use image::codecs::png::PngEncoder;
use image::{ExtendedColorType, ImageEncoder};

use zoocount_shared::capabilities::{
    CameraOperation, CameraOutput, CapturedFrame, FrameData, KvOperation, KvOutput, VisionOperation,
    VisionResponse, VisionResult,
};
use zoocount_shared::{App, Effect, Event, Model};

pub type Tester = AppTester<App, Effect>;

pub const TWO_COWS: &str = r#"{
    "totalCount": 2,
    "detections": [
        {"box_2d": [100, 100, 300, 300], "label": "Cow head", "species": "Cow", "confidence": 0.92},
        {"box_2d": [400, 500, 600, 700], "label": "Cow head", "species": "Cow", "confidence": 0.84}
    ],
    "summary": "Two cows at a fence."
}"#;

/// Effects of one step, grouped by capability.
#[derive(Default)]
pub struct Effects {
    pub renders: usize,
    pub camera: Vec<Request<CameraOperation>>,
    pub vision: Vec<Request<VisionOperation>>,
    pub kv: Vec<Request<KvOperation>>,
}

impl Effects {
    fn split(effects: Vec<Effect>) -> Self {
        let mut out = Self::default();
        for effect in effects {
            match effect {
                Effect::Render(_) => out.renders += 1,
                Effect::Camera(request) => out.camera.push(request),
                Effect::Vision(request) => out.vision.push(request),
                Effect::KeyValue(request) => out.kv.push(request),
            }
        }
        out
    }

    fn extend(&mut self, other: Self) {
        self.renders += other.renders;
        self.camera.extend(other.camera);
        self.vision.extend(other.vision);
        self.kv.extend(other.kv);
    }

    pub fn take_vision(&mut self) -> Request<VisionOperation> {
        assert_eq!(self.vision.len(), 1, "expected exactly one vision request");
        self.vision.remove(0)
    }

    pub fn take_camera(&mut self) -> Request<CameraOperation> {
        assert_eq!(self.camera.len(), 1, "expected exactly one camera request");
        self.camera.remove(0)
    }

    pub fn take_kv(&mut self) -> Request<KvOperation> {
        assert_eq!(self.kv.len(), 1, "expected exactly one storage request");
        self.kv.remove(0)
    }
}

/// Runs `event` and every event it produces, collecting all effects.
pub fn send(app: &Tester, model: &mut Model, event: Event) -> Effects {
    let update = app.update(event, model);
    let mut effects = Effects::split(update.effects);
    for event in update.events {
        effects.extend(send(app, model, event));
    }
    effects
}

pub fn resolve<Op: Operation>(
    app: &Tester,
    model: &mut Model,
    request: &mut Request<Op>,
    output: Op::Output,
) -> Effects {
    let update = app.resolve(request, output).expect("request resolves");
    let mut effects = Effects::split(update.effects);
    for event in update.events {
        effects.extend(send(app, model, event));
    }
    effects
}

pub fn vision_text(text: &str) -> VisionResult {
    Ok(VisionResponse {
        text: Some(text.to_string()),
    })
}

pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let pixels = vec![200u8; (width * height * 4) as usize];
    let mut buf = Vec::new();
    PngEncoder::new(&mut buf)
        .write_image(&pixels, width, height, ExtendedColorType::Rgba8)
        .expect("png encodes");
    buf
}

pub fn rgba_frame(width: u32, height: u32) -> CameraOutput {
    CameraOutput::Frame(CapturedFrame {
        data: FrameData::Rgba {
            width,
            height,
            pixels: vec![90u8; (width * height * 4) as usize],
        },
        captured_at_ms: 1,
    })
}

/// Starts the app and answers the history read with `record`.
pub fn boot(app: &Tester, model: &mut Model, record: Option<Vec<u8>>) -> Effects {
    let mut effects = send(app, model, Event::AppStarted);
    let mut read = effects.take_kv();
    resolve(app, model, &mut read, Ok(KvOutput::Value(record)))
}
