//! Virtual image sensor
//!
//! Listens on a Unix socket at the device id path and treats every frame a
//! client sends as a finger press: finger down, image, finger up. See
//! [`fprust_transport::image`] for the frame layout.

use fprust_core::PrintKind;
use fprust_core::constants::{DEFAULT_ENROLL_STAGES, drivers::VIRTUAL_IMAGE};
use fprust_core::minutiae::MinutiaeExtractor;
use fprust_transport::{Endpoint, EndpointEvent, ImageReader};
use fprust_types::ScanType;
use tracing::{debug, warn};

use crate::device::DeviceCore;
use crate::driver::{Capabilities, Driver, DriverDescriptor};
use crate::image_device::ImagePipeline;

pub struct VirtualImageDriver {
    descriptor: DriverDescriptor,
    pipeline: ImagePipeline,
    reader: ImageReader,
    endpoint: Option<Endpoint>,
}

impl VirtualImageDriver {
    pub fn new() -> Self {
        Self {
            descriptor: DriverDescriptor {
                name: "virtual_image".into(),
                full_name: "Virtual image device for debugging".into(),
                driver_id: VIRTUAL_IMAGE,
                devtype: 0,
                capabilities: Capabilities::ENROLL
                    | Capabilities::VERIFY
                    | Capabilities::IDENTIFY
                    | Capabilities::CAPTURE,
                print_kind: PrintKind::Minutiae,
                nr_enroll_stages: DEFAULT_ENROLL_STAGES,
                scan_type: ScanType::Press,
            },
            pipeline: ImagePipeline::new(),
            reader: ImageReader::new(),
            endpoint: None,
        }
    }

    /// Set the number of images an enroll needs
    pub fn with_enroll_stages(mut self, stages: u32) -> Self {
        self.descriptor.nr_enroll_stages = stages;
        self
    }

    /// Set the match threshold
    pub fn with_threshold(mut self, threshold: u32) -> Self {
        self.pipeline = self.pipeline.with_threshold(threshold);
        self
    }

    /// Detect minutiae in received frames with `extractor`
    pub fn with_extractor(mut self, extractor: impl MinutiaeExtractor + 'static) -> Self {
        self.pipeline = self.pipeline.with_extractor(extractor);
        self
    }

    pub fn threshold(&self) -> u32 {
        self.pipeline.threshold()
    }

    fn frames_received(&mut self, dev: &mut DeviceCore, data: &[u8]) {
        let frames = self.reader.push(data);

        for image in frames.images {
            self.pipeline.report_finger_status(dev, true);
            self.pipeline.image_captured(dev, image);
            self.pipeline.report_finger_status(dev, false);
        }

        if let Some(e) = frames.error {
            warn!("Dropping image data: {}", e);
        }
    }
}

impl Default for VirtualImageDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl Driver for VirtualImageDriver {
    fn descriptor(&self) -> &DriverDescriptor {
        &self.descriptor
    }

    fn open(&mut self, dev: &mut DeviceCore) {
        match Endpoint::bind(&dev.info().device_id, dev.io_sender()) {
            Ok(endpoint) => {
                self.endpoint = Some(endpoint);
                dev.open_complete(Ok(()));
            }
            Err(e) => dev.open_complete(Err(e.into())),
        }
    }

    fn close(&mut self, dev: &mut DeviceCore) {
        self.endpoint = None;
        self.reader.reset();
        dev.close_complete(Ok(()));
    }

    fn enroll(&mut self, dev: &mut DeviceCore) {
        self.pipeline.activate(dev);
    }

    fn verify(&mut self, dev: &mut DeviceCore) {
        self.pipeline.activate(dev);
    }

    fn identify(&mut self, dev: &mut DeviceCore) {
        self.pipeline.activate(dev);
    }

    fn capture(&mut self, dev: &mut DeviceCore) {
        self.pipeline.activate(dev);
    }

    fn cancel(&mut self, dev: &mut DeviceCore) {
        self.pipeline.cancel(dev);
    }

    fn handle_io(&mut self, dev: &mut DeviceCore, event: EndpointEvent) {
        match event {
            EndpointEvent::Connected => debug!("Image client connected"),
            EndpointEvent::Data(data) => self.frames_received(dev, &data),
            EndpointEvent::Disconnected => {
                if self.reader.in_progress() {
                    debug!("Client left mid-frame, discarding partial image");
                }
                self.reader.reset();
            }
            EndpointEvent::Wakeup => {}
        }
    }
}
