use tracing::{debug, info, warn};

use crate::capabilities::{CameraOutput, CameraResult, Capabilities, KvKey, KvResult, VisionResult};
use crate::capabilities::kv::MAX_VALUE_SIZE;
use crate::event::Event;
use crate::image_processing::{still_from_frame, still_from_upload};
use crate::model::{
    AnalysisTicket, AppMode, CameraState, DetectionResult, DisplaySurface, HistoryEntry, ImageId,
    LiveFlow, LivePending, Model, RequestId, StillImage, UploadFlow, UploadPhase,
};
use crate::overlay::RenderedSize;
use crate::view::{
    HistoryCard, HistoryView, ImageView, LiveView, ResultView, UploadView, UserFacingError,
    ViewModel,
};
use crate::vision::{interpret_outcome, AnalysisRequest};
use crate::{AppError, ErrorKind, HISTORY_STORAGE_KEY};

#[derive(Default)]
pub struct App;

impl App {
    fn history_key() -> Option<KvKey> {
        match KvKey::new(HISTORY_STORAGE_KEY) {
            Ok(key) => Some(key),
            Err(e) => {
                warn!(error = %e, "history storage key rejected");
                None
            }
        }
    }

    fn persist_history(model: &mut Model, caps: &Capabilities) {
        let Some(key) = Self::history_key() else {
            return;
        };
        match model.history.to_record_within(MAX_VALUE_SIZE) {
            Ok(record) => {
                debug!(entries = model.history.len(), bytes = record.len(), "persisting history");
                caps.key_value
                    .set(&key, record, |result| Event::HistoryPersisted(Box::new(result)));
            }
            Err(e) => warn!(error = %e, "history not persisted"),
        }
    }

    fn clear_history(model: &mut Model, caps: &Capabilities) {
        model.history.clear();
        if let Some(key) = Self::history_key() {
            caps.key_value
                .delete(&key, |result| Event::HistoryPersisted(Box::new(result)));
        }
        info!("history cleared");
    }

    fn on_history_loaded(result: KvResult, model: &mut Model, caps: &Capabilities) {
        let record = match result {
            Ok(output) => output.into_value(),
            Err(e) => {
                let error = AppError::from(e.into_persistence(true))
                    .with_context("key", HISTORY_STORAGE_KEY);
                warn!(
                    code = error.code(),
                    error = %error,
                    context = ?error.context,
                    "history read failed, starting empty"
                );
                None
            }
        };

        let outcome = model.history.load(record.as_deref());
        info!(
            restored = outcome.restored,
            discarded_corrupt = outcome.discarded_corrupt,
            "history loaded"
        );
        if outcome.needs_persist {
            Self::persist_history(model, caps);
        }
    }

    // --- Mode switching ---

    fn select_mode(mode: AppMode, model: &mut Model, caps: &Capabilities) {
        if model.mode == mode {
            return;
        }
        match model.mode {
            AppMode::Upload => model.upload = UploadFlow::default(),
            AppMode::Live => {
                Self::release_camera(model, caps);
                model.live = LiveFlow {
                    session: model.live.session,
                    ..LiveFlow::default()
                };
            }
            AppMode::History => {}
        }
        debug!(from = ?model.mode, to = ?mode, "mode changed");
        model.mode = mode;
    }

    // --- Analysis ---

    fn dispatch_analysis(
        surface: DisplaySurface,
        request_id: RequestId,
        image: StillImage,
        model: &Model,
        caps: &Capabilities,
    ) {
        let request = AnalysisRequest::for_image(&image, &model.config);
        info!(
            ?surface,
            request_id = %request_id,
            mime_type = %image.mime_type,
            bytes = image.byte_len,
            "analysis requested"
        );
        let ticket = Box::new(AnalysisTicket {
            surface,
            request_id,
            image,
        });
        caps.vision.analyze(request, move |outcome| Event::AnalysisCompleted {
            ticket,
            outcome: Box::new(outcome),
        });
    }

    fn begin_upload_analysis(model: &mut Model, caps: &Capabilities) {
        let Some(image) = model.upload.preview.clone() else {
            return;
        };
        let request_id = RequestId::generate();
        model.upload.in_flight = Some(request_id.clone());
        model.upload.auto_analyze_pending = false;
        model.upload.phase = UploadPhase::Analyzing;
        Self::dispatch_analysis(DisplaySurface::Upload, request_id, image, model, caps);
    }

    fn on_analysis_completed(
        ticket: AnalysisTicket,
        outcome: VisionResult,
        model: &mut Model,
        caps: &Capabilities,
    ) {
        let outcome = interpret_outcome(outcome).map_err(|e| {
            e.with_context("request_id", ticket.request_id.as_str())
                .with_context("surface", format!("{:?}", ticket.surface))
        });

        match &outcome {
            Ok(result) => {
                info!(
                    request_id = %ticket.request_id,
                    total_count = result.total_count,
                    detections = result.detections.len(),
                    "analysis succeeded"
                );
                model
                    .history
                    .append(HistoryEntry::new(ticket.image.data_url(), result.clone()));
                if model.history.is_loaded() {
                    Self::persist_history(model, caps);
                } else {
                    debug!("history write deferred until the stored record is loaded");
                }
            }
            Err(e) => {
                warn!(request_id = %ticket.request_id, code = e.code(), error = %e, "analysis failed");
            }
        }

        match ticket.surface {
            DisplaySurface::Upload => Self::settle_upload(&ticket, outcome, model, caps),
            DisplaySurface::Live => Self::settle_live(&ticket, outcome, model),
        }
    }

    fn settle_upload(
        ticket: &AnalysisTicket,
        outcome: Result<DetectionResult, AppError>,
        model: &mut Model,
        caps: &Capabilities,
    ) {
        let upload = &mut model.upload;
        if upload.in_flight.as_ref() != Some(&ticket.request_id) {
            debug!(request_id = %ticket.request_id, "response for an abandoned upload ignored");
            return;
        }
        upload.in_flight = None;

        let still_showing = upload
            .preview
            .as_ref()
            .is_some_and(|preview| preview.id == ticket.image.id);

        if still_showing && upload.phase == UploadPhase::Analyzing {
            upload.phase = match outcome {
                Ok(result) => UploadPhase::Result(result),
                Err(error) => UploadPhase::Error(error),
            };
            return;
        }

        debug!(request_id = %ticket.request_id, "response for a replaced preview discarded");
        if upload.auto_analyze_pending {
            Self::begin_upload_analysis(model, caps);
        }
    }

    fn settle_live(
        ticket: &AnalysisTicket,
        outcome: Result<DetectionResult, AppError>,
        model: &mut Model,
    ) {
        let live = &mut model.live;
        if live.in_flight() != Some(&ticket.request_id) {
            debug!(request_id = %ticket.request_id, "response for an abandoned capture ignored");
            return;
        }
        live.pending = None;
        match outcome {
            Ok(result) => {
                live.result = Some(result);
                live.error = None;
            }
            Err(error) => live.error = Some(error),
        }
    }

    // --- Upload flow ---

    fn select_file(bytes: &[u8], file_name: Option<&str>, model: &mut Model, caps: &Capabilities) {
        let upload = &mut model.upload;
        upload.auto_analyze_pending = false;

        let image = match still_from_upload(bytes, model.config.max_upload_bytes) {
            Ok(image) => image,
            Err(e) => {
                warn!(error = %e, file_name = file_name.unwrap_or_default(), "upload rejected");
                upload.preview = None;
                upload.phase = UploadPhase::Error(e.into());
                return;
            }
        };

        info!(
            mime_type = %image.mime_type,
            bytes = image.byte_len,
            file_name = file_name.unwrap_or_default(),
            "upload preview ready"
        );
        upload.preview = Some(image);
        upload.phase = UploadPhase::Previewing;

        if !model.config.auto_analyze_uploads {
            return;
        }
        if upload.in_flight.is_some() {
            debug!("previous analysis still pending, new upload queued");
            upload.auto_analyze_pending = true;
        } else {
            Self::begin_upload_analysis(model, caps);
        }
    }

    // --- Live flow ---

    fn start_camera(model: &mut Model, caps: &Capabilities) {
        if model.mode != AppMode::Live {
            warn!(mode = ?model.mode, "camera start outside live mode ignored");
            return;
        }
        if model.live.camera != CameraState::Off {
            debug!(camera = ?model.live.camera, "camera already started");
            return;
        }

        model.live.session += 1;
        model.live.camera = CameraState::Starting;
        model.live.error = None;

        let session = model.live.session;
        caps.camera.start_stream(
            session,
            model.config.stream.clone(),
            move |result| Event::CameraStarted {
                session,
                result: Box::new(result),
            },
        );
    }

    fn release_camera(model: &mut Model, caps: &Capabilities) {
        let live = &mut model.live;
        if live.camera.holds_device() {
            caps.camera.stop_stream(live.session);
            info!(session = live.session, "camera released");
        }
        live.camera = CameraState::Off;
        live.stream_size = None;
        if live.pending == Some(LivePending::Capturing) {
            live.pending = None;
        }
    }

    fn on_camera_started(session: u64, result: CameraResult, model: &mut Model, caps: &Capabilities) {
        let live = &mut model.live;
        let current = session == live.session && live.camera == CameraState::Starting;

        if !current {
            // Whatever a stale start opened belongs to no live session.
            if matches!(result, Ok(CameraOutput::StreamStarted { .. })) {
                debug!(session, current = live.session, "releasing stream from a stale start");
                caps.camera.stop_stream(session);
            } else {
                debug!(session, camera = ?live.camera, "stale camera start ignored");
            }
            return;
        }

        match result {
            Ok(CameraOutput::StreamStarted { width, height }) => {
                info!(session, width, height, "camera streaming");
                live.camera = CameraState::On;
                live.stream_size = Some((width, height));
            }
            Ok(CameraOutput::Frame(_)) => {
                warn!(session, "camera answered a start request with a frame");
                live.camera = CameraState::Off;
                live.error = Some(AppError::new(
                    ErrorKind::Camera,
                    "camera returned an unexpected response",
                ));
                caps.camera.stop_stream(session);
            }
            Err(e) => {
                if e.is_permission_error() {
                    warn!(session, "camera permission denied");
                } else {
                    warn!(session, error = %e, "camera failed to start");
                }
                live.camera = CameraState::Off;
                live.error = Some(e.into());
            }
        }
    }

    fn capture(model: &mut Model, caps: &Capabilities) {
        if !model.live.can_capture() {
            warn!(
                camera = ?model.live.camera,
                pending = ?model.live.pending,
                "capture trigger rejected"
            );
            return;
        }
        model.live.pending = Some(LivePending::Capturing);
        caps.camera
            .capture_frame(|result| Event::FrameCaptured(Box::new(result)));
    }

    fn on_frame_captured(result: CameraResult, model: &mut Model, caps: &Capabilities) {
        if model.live.pending != Some(LivePending::Capturing)
            || model.live.camera != CameraState::On
        {
            debug!("frame arrived after the capture was abandoned");
            return;
        }
        model.live.pending = None;

        let frame = match result {
            Ok(output) => output.into_frame(),
            Err(e) => {
                warn!(error = %e, "frame capture failed");
                model.live.error = Some(e.into());
                return;
            }
        };
        let Some(frame) = frame else {
            warn!("camera answered a capture request without a frame");
            model.live.error = Some(AppError::new(
                ErrorKind::Camera,
                "camera returned no frame",
            ));
            return;
        };

        match still_from_frame(frame, model.config.capture_jpeg_quality) {
            Ok(image) => {
                let request_id = RequestId::generate();
                let live = &mut model.live;
                live.last_capture = Some(image.clone());
                live.result = None;
                live.error = None;
                live.pending = Some(LivePending::Analyzing(request_id.clone()));
                Self::dispatch_analysis(DisplaySurface::Live, request_id, image, model, caps);
            }
            Err(e) => {
                warn!(error = %e, "captured frame could not be encoded");
                model.live.error = Some(e.into());
            }
        }
    }

    // --- Overlay sizing ---

    fn on_image_loaded(image_id: &ImageId, width: f64, height: f64, model: &mut Model) {
        let surface = if model
            .upload
            .preview
            .as_ref()
            .is_some_and(|image| &image.id == image_id)
        {
            Some(DisplaySurface::Upload)
        } else if model
            .live
            .last_capture
            .as_ref()
            .is_some_and(|image| &image.id == image_id)
        {
            Some(DisplaySurface::Live)
        } else {
            None
        };

        match surface.and_then(|surface| model.image_on_mut(surface)) {
            Some(image) => image.rendered_size = RenderedSize::new(width, height),
            None => debug!(image_id = %image_id, "load reported for an image no longer shown"),
        }
    }
}

impl crux_core::App for App {
    type Event = Event;
    type Model = Model;
    type ViewModel = ViewModel;
    type Capabilities = Capabilities;

    fn update(&self, event: Event, model: &mut Model, caps: &Capabilities) {
        model.update_timestamp();

        if event.is_user_initiated() {
            debug!(event = event.name(), "user action");
        }

        match event {
            Event::AppStarted => {
                if model.history.is_loaded() {
                    debug!("history already loaded");
                } else if let Some(key) = Self::history_key() {
                    caps.key_value
                        .get(&key, |result| Event::HistoryLoaded(Box::new(result)));
                }
                caps.render.render();
            }

            Event::ConfigUpdated(config) => {
                model.config = config.validated();
                debug!(model_name = %model.config.model_name, "config updated");
                caps.render.render();
            }

            Event::ModeSelected(mode) => {
                Self::select_mode(mode, model, caps);
                caps.render.render();
            }

            Event::FileSelected { bytes, file_name } => {
                Self::select_file(&bytes, file_name.as_deref(), model, caps);
                caps.render.render();
            }

            Event::AnalyzeUploadRequested => {
                if model.upload.can_analyze() {
                    Self::begin_upload_analysis(model, caps);
                } else {
                    warn!(
                        phase = model.upload.phase.name(),
                        in_flight = model.upload.in_flight.is_some(),
                        "analysis trigger rejected"
                    );
                }
                caps.render.render();
            }

            Event::StartCameraRequested => {
                Self::start_camera(model, caps);
                caps.render.render();
            }

            Event::StopCameraRequested => {
                Self::release_camera(model, caps);
                caps.render.render();
            }

            Event::CaptureRequested => {
                Self::capture(model, caps);
                caps.render.render();
            }

            Event::ImageLoaded {
                image_id,
                width,
                height,
            } => {
                Self::on_image_loaded(&image_id, width, height, model);
                caps.render.render();
            }

            Event::ViewportResized {
                surface,
                width,
                height,
            } => {
                if let Some(image) = model.image_on_mut(surface) {
                    image.rendered_size = RenderedSize::new(width, height);
                    caps.render.render();
                }
            }

            Event::ClearHistoryRequested => {
                Self::clear_history(model, caps);
                caps.render.render();
            }

            Event::CameraStarted { session, result } => {
                Self::on_camera_started(session, *result, model, caps);
                caps.render.render();
            }

            Event::FrameCaptured(result) => {
                Self::on_frame_captured(*result, model, caps);
                caps.render.render();
            }

            Event::AnalysisCompleted { ticket, outcome } => {
                Self::on_analysis_completed(*ticket, *outcome, model, caps);
                caps.render.render();
            }

            Event::HistoryLoaded(result) => {
                Self::on_history_loaded(*result, model, caps);
                caps.render.render();
            }

            Event::HistoryPersisted(result) => {
                if let Err(e) = *result {
                    let error = AppError::from(e.into_persistence(false))
                        .with_context("key", HISTORY_STORAGE_KEY);
                    warn!(
                        code = error.code(),
                        error = %error,
                        context = ?error.context,
                        "history write failed"
                    );
                }
            }
        }
    }

    fn view(&self, model: &Model) -> ViewModel {
        let upload = &model.upload;
        let live = &model.live;

        ViewModel {
            mode: model.mode,
            upload: UploadView {
                phase: upload.phase.name().to_string(),
                image: upload
                    .preview
                    .as_ref()
                    .map(|image| ImageView::new(image, upload.result())),
                is_loading: upload.is_loading(),
                can_analyze: upload.can_analyze(),
                result: upload.result().map(ResultView::from),
                error: upload.error().map(UserFacingError::from),
            },
            live: LiveView {
                camera: live.camera,
                can_start: live.camera == CameraState::Off,
                can_capture: live.can_capture(),
                is_analyzing: live.is_analyzing(),
                last_capture: live
                    .last_capture
                    .as_ref()
                    .map(|image| ImageView::new(image, live.result.as_ref())),
                result: live.result.as_ref().map(ResultView::from),
                error: live.error.as_ref().map(UserFacingError::from),
            },
            history: HistoryView {
                cards: model
                    .history
                    .entries()
                    .iter()
                    .map(|entry| HistoryCard::new(entry, model.view_timestamp_ms))
                    .collect(),
                can_clear: !model.history.is_empty(),
            },
            history_count: model.history.len(),
        }
    }
}
