//! Shared action handling for image-capture sensors
//!
//! Image drivers only deliver frames and finger state; the pipeline turns
//! them into enroll stages, verify and identify decisions, or captures.

use fprust_core::constants::DEFAULT_MATCH_THRESHOLD;
use fprust_core::matching::{self, PairTableScorer};
use fprust_core::minutiae::{AttachedMinutiae, MinutiaeExtractor};
use fprust_core::{Print, PrintKind};
use fprust_types::Image;
use tracing::{debug, warn};

use crate::action::{
    DeviceAction, EnrollResult, EnrollStage, IdentifyOutcome, RetryReason, VerifyOutcome, VerifyResult,
};
use crate::device::{DeviceCore, DeviceEvent};
use crate::error::Error;

/// Input of the action the pipeline is serving
#[derive(Debug, Default)]
enum Session {
    #[default]
    Idle,
    Capture,
    Enroll {
        template: Print,
        stage: u32,
    },
    Verify(Print),
    Identify(Vec<Print>),
}

pub struct ImagePipeline {
    threshold: u32,
    extractor: Box<dyn MinutiaeExtractor>,
    scorer: PairTableScorer,
    session: Session,
    finger_present: bool,
}

impl ImagePipeline {
    /// Pipeline with the default threshold, relying on minutiae attached to images
    pub fn new() -> Self {
        Self {
            threshold: DEFAULT_MATCH_THRESHOLD,
            extractor: Box::new(AttachedMinutiae),
            scorer: PairTableScorer,
            session: Session::Idle,
            finger_present: false,
        }
    }

    /// Score a template needs to count as a match
    pub fn with_threshold(mut self, threshold: u32) -> Self {
        self.threshold = threshold;
        self
    }

    /// Detect minutiae with `extractor` for images that carry none
    pub fn with_extractor(mut self, extractor: impl MinutiaeExtractor + 'static) -> Self {
        self.extractor = Box::new(extractor);
        self
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    /// True while an action waits for images
    pub fn is_active(&self) -> bool {
        !matches!(self.session, Session::Idle)
    }

    /// Pick up the input of the action that just started on `dev`
    pub fn activate(&mut self, dev: &mut DeviceCore) {
        self.session = match dev.current_action() {
            DeviceAction::Capture => {
                debug!(wait_for_finger = dev.capture_data(), "Waiting for capture");
                Session::Capture
            }
            DeviceAction::Enroll => {
                let mut template = dev.take_enroll_data();
                if let Err(e) = template.set_kind(PrintKind::Minutiae) {
                    dev.action_error(e.into());
                    return;
                }
                Session::Enroll { template, stage: 0 }
            }
            DeviceAction::Verify => Session::Verify(dev.take_verify_data()),
            DeviceAction::Identify => Session::Identify(dev.take_identify_data()),
            other => {
                warn!("Image pipeline cannot serve {}", other);
                dev.action_error(Error::ActionUnsupported(other));
                return;
            }
        };
        debug!("Image pipeline active for {}", dev.current_action());
    }

    /// Forget the current action without completing it
    pub fn deactivate(&mut self) {
        self.session = Session::Idle;
    }

    /// Finish the current action as cancelled
    pub fn cancel(&mut self, dev: &mut DeviceCore) {
        if self.is_active() {
            self.deactivate();
            dev.action_error(Error::Cancelled);
        }
    }

    /// Report a finger change; repeated reports of the same state are dropped
    pub fn report_finger_status(&mut self, dev: &mut DeviceCore, present: bool) {
        if self.finger_present == present {
            return;
        }
        self.finger_present = present;
        debug!(present, "Finger status changed");
        dev.emit(DeviceEvent::FingerStatus(present));
    }

    /// Report an unusable scan
    ///
    /// Enroll keeps going with a retry stage; any other action ends with
    /// the retry error.
    pub fn retry_scan(&mut self, dev: &mut DeviceCore, reason: RetryReason) {
        match std::mem::take(&mut self.session) {
            Session::Idle => debug!("Ignoring retry ({}) with no action", reason),
            Session::Enroll { template, stage } => {
                dev.enroll_progress(EnrollStage {
                    completed: stage,
                    result: EnrollResult::Retry(reason),
                    print: None,
                    error: Some(Error::Retry(reason)),
                });
                self.session = Session::Enroll { template, stage };
            }
            _ => dev.action_error(Error::Retry(reason)),
        }
    }

    /// Process a complete image from the sensor
    pub fn image_captured(&mut self, dev: &mut DeviceCore, image: Image) {
        dev.emit(DeviceEvent::ImageCaptured(image.clone()));

        match std::mem::take(&mut self.session) {
            Session::Idle => debug!("Image received with no action in progress"),
            Session::Capture => dev.capture_complete(Some(image), None),
            Session::Enroll { template, stage } => self.enroll_image(dev, &image, template, stage),
            Session::Verify(template) => {
                let scanned = match self.scan(dev, &image) {
                    Ok(print) => print,
                    Err(e) => {
                        warn!("Failed to detect minutiae: {}", e);
                        dev.verify_complete(None, Some(Error::Retry(RetryReason::General)));
                        return;
                    }
                };

                match matching::match_prints(&template, &scanned, self.threshold, &self.scorer) {
                    Ok(result) => {
                        let result = if result.is_match() {
                            VerifyResult::Match
                        } else {
                            VerifyResult::NoMatch
                        };
                        let outcome = VerifyOutcome {
                            result,
                            scanned: Some(scanned),
                        };
                        dev.verify_complete(Some(outcome), None);
                    }
                    Err(e) => dev.verify_complete(None, Some(e.into())),
                }
            }
            Session::Identify(gallery) => {
                let scanned = match self.scan(dev, &image) {
                    Ok(print) => print,
                    Err(e) => {
                        warn!("Failed to detect minutiae: {}", e);
                        dev.identify_complete(None, Some(Error::Retry(RetryReason::General)));
                        return;
                    }
                };

                match matching::identify(&gallery, &scanned, self.threshold, &self.scorer) {
                    Ok(index) => {
                        let outcome = IdentifyOutcome {
                            matched: index.map(|i| gallery[i].clone()),
                            scanned: Some(scanned),
                        };
                        dev.identify_complete(Some(outcome), None);
                    }
                    Err(e) => dev.identify_complete(None, Some(e.into())),
                }
            }
        }
    }

    fn enroll_image(&mut self, dev: &mut DeviceCore, image: &Image, mut template: Print, mut stage: u32) {
        let stages = dev.info().nr_enroll_stages;

        match self.scan(dev, image) {
            Ok(print) => {
                if let Err(e) = template.add_print(&print) {
                    dev.enroll_complete(None, Some(e.into()));
                    return;
                }
                stage += 1;
                let result = if stage >= stages {
                    EnrollResult::Complete
                } else {
                    EnrollResult::Pass
                };
                dev.enroll_progress(EnrollStage {
                    completed: stage,
                    result,
                    print: Some(print),
                    error: None,
                });
            }
            Err(e) => {
                warn!("Failed to detect minutiae: {}", e);
                dev.enroll_progress(EnrollStage {
                    completed: stage,
                    result: EnrollResult::Retry(RetryReason::General),
                    print: None,
                    error: Some(Error::Retry(RetryReason::General)),
                });
            }
        }

        if stage >= stages {
            dev.enroll_complete(Some(template), None);
        } else {
            self.session = Session::Enroll { template, stage };
        }
    }

    /// Build a single-template print from an image
    fn scan(&self, dev: &DeviceCore, image: &Image) -> fprust_core::Result<Print> {
        let mut print = dev.new_print();
        print.set_kind(PrintKind::Minutiae)?;
        print.add_from_image(image, self.extractor.as_ref())?;
        Ok(print)
    }
}

impl Default for ImagePipeline {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::Device;
    use crate::drivers::VirtualImageDriver;
    use fprust_transport::EndpointEvent;
    use fprust_transport::image::encode_frame;
    use fprust_types::Minutia;
    use pretty_assertions::assert_eq;
    use std::sync::{Arc, Mutex};

    /// Finger chosen by the first pixel: 1 and 2 are different fingers, 0 has no minutiae
    struct PixelFinger;

    impl MinutiaeExtractor for PixelFinger {
        fn detect(&self, image: &Image) -> fprust_core::Result<Vec<Minutia>> {
            let points: &[(i32, i32, i32)] = match image.pixel(0, 0) {
                Some(1) => &[
                    (20, 30, 3),
                    (35, 80, 28),
                    (50, 15, 12),
                    (60, 60, 7),
                    (75, 100, 0),
                    (90, 40, 19),
                    (100, 75, 25),
                    (110, 20, 9),
                    (120, 110, 31),
                    (130, 55, 14),
                    (145, 90, 22),
                    (150, 30, 5),
                ],
                Some(2) => &[(5, 5, 0), (40, 10, 8), (20, 60, 16)],
                _ => &[],
            };
            Ok(points.iter().map(|&(x, y, d)| Minutia::new(x, y, d, 0.9)).collect())
        }
    }

    type Slot<T> = Arc<Mutex<Option<crate::Result<T>>>>;

    fn slot<T: Send + 'static>() -> (Slot<T>, impl FnOnce(crate::Result<T>) + Send + 'static) {
        let slot = Arc::new(Mutex::new(None));
        let writer = slot.clone();
        (slot, move |result| *writer.lock().unwrap() = Some(result))
    }

    fn opened(stages: u32) -> Device<VirtualImageDriver> {
        let path = std::env::temp_dir().join(format!("fprust-imgdev-{}.sock", uuid::Uuid::new_v4()));
        let driver = VirtualImageDriver::new()
            .with_enroll_stages(stages)
            .with_extractor(PixelFinger);
        let mut device = Device::new(driver, path.to_string_lossy());
        device.open(|result| assert!(result.is_ok()));
        device
    }

    fn press(device: &mut Device<VirtualImageDriver>, finger: u8) {
        let pixels = vec![finger; 200 * 200];
        device.handle_io(EndpointEvent::Data(encode_frame(200, 200, &pixels)));
    }

    fn enroll(device: &mut Device<VirtualImageDriver>, fingers: &[u8]) -> (Print, Vec<(u32, EnrollResult)>) {
        let stages = Arc::new(Mutex::new(Vec::new()));
        let seen = stages.clone();
        let (enrolled, done) = slot();
        let template = device.new_print();
        device.enroll(
            template,
            move |stage: EnrollStage| seen.lock().unwrap().push((stage.completed, stage.result)),
            done,
        );

        for &finger in fingers {
            press(device, finger);
        }

        let print = enrolled.lock().unwrap().take().unwrap().unwrap();
        let stages = stages.lock().unwrap().clone();
        (print, stages)
    }

    #[tokio::test]
    async fn test_enroll_collects_stages() {
        let mut device = opened(3);
        let (print, stages) = enroll(&mut device, &[1, 0, 1, 1]);

        assert_eq!(print.kind(), PrintKind::Minutiae);
        assert_eq!(print.templates().len(), 3);
        assert_eq!(
            stages,
            vec![
                (1, EnrollResult::Pass),
                (1, EnrollResult::Retry(RetryReason::General)),
                (2, EnrollResult::Pass),
                (3, EnrollResult::Complete),
            ]
        );
        assert_eq!(device.current_action(), DeviceAction::None);
    }

    #[tokio::test]
    async fn test_verify_same_and_other_finger() {
        let mut device = opened(2);
        let (print, _) = enroll(&mut device, &[1, 1]);

        let (verified, done) = slot();
        device.verify(print.clone(), done);
        press(&mut device, 1);
        let outcome = verified.lock().unwrap().take().unwrap().unwrap();
        assert_eq!(outcome.result, VerifyResult::Match);
        assert_eq!(outcome.scanned.unwrap().templates().len(), 1);

        let (verified, done) = slot();
        device.verify(print, done);
        press(&mut device, 2);
        let outcome = verified.lock().unwrap().take().unwrap().unwrap();
        assert_eq!(outcome.result, VerifyResult::NoMatch);
    }

    #[tokio::test]
    async fn test_verify_unreadable_scan_is_retry() {
        let mut device = opened(1);
        let (print, _) = enroll(&mut device, &[1]);

        let (verified, done) = slot();
        device.verify(print, done);
        press(&mut device, 0);
        assert!(matches!(
            verified.lock().unwrap().take(),
            Some(Err(Error::Retry(RetryReason::General)))
        ));
    }

    #[tokio::test]
    async fn test_identify_picks_matching_print() {
        let mut device = opened(1);
        let (mut first, _) = enroll(&mut device, &[2]);
        let (mut second, _) = enroll(&mut device, &[1]);
        first.set_username("other");
        second.set_username("owner");

        let (identified, done) = slot();
        device.identify(vec![first, second], done);
        press(&mut device, 1);

        let outcome = identified.lock().unwrap().take().unwrap().unwrap();
        assert_eq!(outcome.matched.unwrap().username(), Some("owner"));
        assert!(outcome.scanned.is_some());
    }

    #[tokio::test]
    async fn test_capture_and_events() {
        let mut device = opened(1);
        let mut events = device.subscribe();

        let (captured, done) = slot();
        device.capture(true, done);
        device.handle_io(EndpointEvent::Data(encode_frame(2, 2, &[10, 20, 30, 40])));

        let image = captured.lock().unwrap().take().unwrap().unwrap();
        assert_eq!(image.data().as_ref(), &[10, 20, 30, 40]);

        assert_eq!(events.try_recv().unwrap(), DeviceEvent::FingerStatus(true));
        assert_eq!(events.try_recv().unwrap(), DeviceEvent::ImageCaptured(image));
        assert_eq!(events.try_recv().unwrap(), DeviceEvent::FingerStatus(false));
    }

    #[tokio::test]
    async fn test_image_without_action_only_broadcast() {
        let mut device = opened(1);
        let mut events = device.subscribe();

        press(&mut device, 1);
        assert_eq!(events.try_recv().unwrap(), DeviceEvent::FingerStatus(true));
        assert!(matches!(events.try_recv().unwrap(), DeviceEvent::ImageCaptured(_)));
        assert_eq!(device.current_action(), DeviceAction::None);
    }

    #[tokio::test]
    async fn test_cancel_verify() {
        let mut device = opened(1);
        let (print, _) = enroll(&mut device, &[1]);

        let (verified, done) = slot();
        device.verify(print, done);
        assert!(device.cancel());
        assert!(matches!(verified.lock().unwrap().take(), Some(Err(Error::Cancelled))));

        press(&mut device, 1);
        assert_eq!(device.current_action(), DeviceAction::None);
    }

    #[tokio::test]
    async fn test_malformed_frame_dropped() {
        let mut device = opened(1);
        let (captured, done) = slot::<Image>();
        device.capture(false, done);

        device.handle_io(EndpointEvent::Data(encode_frame(-1, 4, &[])));
        assert!(captured.lock().unwrap().is_none());

        device.handle_io(EndpointEvent::Data(encode_frame(1, 1, &[7])));
        assert_eq!(captured.lock().unwrap().take().unwrap().unwrap().pixel(0, 0), Some(7));
    }

    #[tokio::test]
    async fn test_frame_before_bad_header_still_captured() {
        let mut device = opened(1);
        let mut events = device.subscribe();
        let (captured, done) = slot::<Image>();
        device.capture(false, done);

        let mut data = encode_frame(1, 1, &[7]).to_vec();
        data.extend_from_slice(&encode_frame(0, 5, &[]));
        device.handle_io(EndpointEvent::Data(data.into()));

        assert_eq!(captured.lock().unwrap().take().unwrap().unwrap().pixel(0, 0), Some(7));
        assert_eq!(events.try_recv().unwrap(), DeviceEvent::FingerStatus(true));
        assert!(matches!(events.try_recv().unwrap(), DeviceEvent::ImageCaptured(_)));
        assert_eq!(events.try_recv().unwrap(), DeviceEvent::FingerStatus(false));
    }

    #[test]
    fn test_finger_status_deduplicated() {
        let driver = VirtualImageDriver::new();
        let mut device = Device::new(driver, "unused");
        let mut events = device.subscribe();
        let mut pipeline = ImagePipeline::new();

        pipeline.report_finger_status(device.core_mut(), true);
        pipeline.report_finger_status(device.core_mut(), true);
        pipeline.report_finger_status(device.core_mut(), false);

        assert_eq!(events.try_recv().unwrap(), DeviceEvent::FingerStatus(true));
        assert_eq!(events.try_recv().unwrap(), DeviceEvent::FingerStatus(false));
        assert!(events.try_recv().is_err());
    }
}
