//! Camera-identifier abstraction layer (spec.md §3, §4.1).
//!
//! `CameraID` is the only identifier callers ever see. The mapping to/from
//! device paths is pure and total: an unrecognised shape is echoed back
//! unchanged rather than rejected, so callers can always round-trip an
//! opaque identifier even if it never originated from a `/dev/video*` path.

/// `camera<N>` — stable, client-facing. Survives device disconnect/reconnect.
pub type CameraId = String;

/// `/dev/video<N>` or `/dev/custom<N>` — OS device path, known only to the
/// Controller via the external camera monitor.
pub type DevicePath = String;

/// Media-server path name. Invariant: `PathName == CameraID` for camera
/// paths; `_viewing`/`_snapshot` suffixes are appended for multiplexed
/// use-cases (see [`crate::models::UseCase`]).
pub type PathName = String;

const VIDEO_PREFIX: &str = "/dev/video";
const CUSTOM_PREFIX: &str = "/dev/custom";
const CAMERA_PREFIX: &str = "camera";

/// `cameraIDFromDevice("/dev/video" + N) = "camera" + N`; any other shape is
/// echoed back unchanged. Total and pure.
pub fn camera_id_from_device(device: &str) -> CameraId {
    if let Some(n) = device.strip_prefix(VIDEO_PREFIX) {
        if is_ascii_digits(n) {
            return format!("{CAMERA_PREFIX}{n}");
        }
    }
    device.to_string()
}

/// `deviceFromCameraID("camera" + N) = "/dev/video" + N`; any other shape is
/// echoed back unchanged. Total and pure.
pub fn device_from_camera_id(camera_id: &str) -> DevicePath {
    if let Some(n) = camera_id.strip_prefix(CAMERA_PREFIX) {
        if is_ascii_digits(n) {
            return format!("{VIDEO_PREFIX}{n}");
        }
    }
    camera_id.to_string()
}

/// A device path is acceptable to the transcoder if it starts with one of
/// the two recognised prefixes (spec.md §3, `DevicePath` invariant).
pub fn is_known_device_prefix(device: &str) -> bool {
    device.starts_with(VIDEO_PREFIX) || device.starts_with(CUSTOM_PREFIX)
}

fn is_ascii_digits(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_for_all_numeric_suffixes() {
        for n in 0..64 {
            let camera_id = format!("camera{n}");
            let device = format!("/dev/video{n}");
            assert_eq!(camera_id_from_device(&device), camera_id);
            assert_eq!(device_from_camera_id(&camera_id), device);
            assert_eq!(
                camera_id_from_device(&device_from_camera_id(&camera_id)),
                camera_id
            );
            assert_eq!(
                device_from_camera_id(&camera_id_from_device(&device)),
                device
            );
        }
    }

    #[test]
    fn unrecognised_shapes_are_echoed() {
        assert_eq!(camera_id_from_device("rtsp://host/stream"), "rtsp://host/stream");
        assert_eq!(device_from_camera_id("not-a-camera-id"), "not-a-camera-id");
        assert_eq!(camera_id_from_device("/dev/videoX"), "/dev/videoX");
    }

    #[test]
    fn known_device_prefixes() {
        assert!(is_known_device_prefix("/dev/video0"));
        assert!(is_known_device_prefix("/dev/custom7"));
        assert!(!is_known_device_prefix("rtsp://host/stream"));
    }
}
