// Unit tests for domain models

use super::*;
use crate::domain::errors::ErrorKind;

#[test]
fn test_clip_request_valid() {
    let request = ClipRequest::new("talk.mp4", 10.0, 20.0).unwrap();
    assert_eq!(request.duration(), 10.0);
    assert_eq!(request.source(), Path::new("talk.mp4"));
}

#[test]
fn test_clip_request_rejects_inverted_and_empty_windows() {
    let inverted = ClipRequest::new("talk.mp4", 20.0, 10.0).unwrap_err();
    assert_eq!(inverted.kind(), ErrorKind::InvalidRequest);

    let empty = ClipRequest::new("talk.mp4", 5.0, 5.0).unwrap_err();
    assert_eq!(empty.kind(), ErrorKind::InvalidRequest);
}

#[test]
fn test_clip_request_rejects_negative_and_nan() {
    assert!(ClipRequest::new("talk.mp4", -1.0, 2.0).is_err());
    assert!(ClipRequest::new("talk.mp4", f64::NAN, 2.0).is_err());
    assert!(ClipRequest::new("talk.mp4", 0.0, f64::INFINITY).is_err());
}

#[test]
fn test_media_properties_even_adjusts_dimensions() {
    let metadata = SourceMetadata {
        width: 1281,
        height: 721,
        duration_seconds: 60.0,
    };
    let props = MediaProperties::from_metadata(&metadata, FRAME_RATE).unwrap();
    assert_eq!(props.width, 1280);
    assert_eq!(props.height, 720);
    assert_eq!(props.frame_rate, 30);
}

#[test]
fn test_media_properties_rejects_degenerate_sources() {
    let one_pixel = SourceMetadata {
        width: 1,
        height: 720,
        duration_seconds: 60.0,
    };
    let err = MediaProperties::from_metadata(&one_pixel, FRAME_RATE).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidSource);

    let no_duration = SourceMetadata {
        width: 640,
        height: 480,
        duration_seconds: f64::NAN,
    };
    let err = MediaProperties::from_metadata(&no_duration, FRAME_RATE).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidSource);
}

#[test]
fn test_surface_requires_even_dimensions() {
    assert!(Surface::new(640, 480).is_ok());
    assert!(Surface::new(641, 480).is_err());
    assert!(Surface::new(0, 480).is_err());
}

#[test]
fn test_surface_layout_is_yuv420() {
    let surface = Surface::new(4, 2).unwrap();
    assert_eq!(surface.as_bytes().len(), 12);
    assert_eq!(surface.plane(Plane::Y).len(), 8);
    assert_eq!(surface.plane(Plane::U).len(), 2);
    assert_eq!(surface.plane(Plane::V).len(), 2);
}

#[test]
fn test_surface_fill_black() {
    let mut surface = Surface::new(4, 4).unwrap();
    surface.fill_rgb([0, 0, 0]);
    assert!(surface.plane(Plane::Y).iter().all(|&y| y == 16));
    assert!(surface.plane(Plane::U).iter().all(|&u| u == 128));
    assert!(surface.plane(Plane::V).iter().all(|&v| v == 128));
}

#[test]
fn test_surface_copy_plane_honours_stride() {
    let mut surface = Surface::new(2, 2).unwrap();
    // Two rows of two pixels each, padded to a stride of four
    let source = [1, 2, 99, 99, 3, 4, 99, 99];
    surface.copy_plane_from(Plane::Y, &source, 4).unwrap();
    assert_eq!(surface.plane(Plane::Y), &[1, 2, 3, 4]);

    let short = [1, 2, 3];
    assert!(surface.copy_plane_from(Plane::Y, &short, 2).is_err());
}

#[test]
fn test_decoded_audio_duration() {
    let audio = DecodedAudio {
        sample_rate: 48_000,
        channels: vec![vec![0.0; 24_000], vec![0.0; 24_000]],
    };
    assert_eq!(audio.frame_count(), 24_000);
    assert_eq!(audio.duration_seconds(), 0.5);
}

#[test]
fn test_clip_segment_to_request() {
    let segment = ClipSegment {
        title: "Intro".to_string(),
        start: "00:10".to_string(),
        end: "01:02".to_string(),
        description: String::new(),
    };
    let request = segment.to_request("talk.mp4").unwrap();
    assert_eq!(request.start_seconds(), 10.0);
    assert_eq!(request.end_seconds(), 62.0);
}

#[test]
fn test_clip_segment_deserializes_annotation_json() {
    let json = r#"[{"title": "Wow", "start": "00:10", "end": "00:20", "description": "..."}]"#;
    let segments: Vec<ClipSegment> = serde_json::from_str(json).unwrap();
    assert_eq!(segments.len(), 1);
    assert_eq!(segments[0].title, "Wow");
}

#[test]
fn test_clip_segment_with_bad_times_is_invalid_request() {
    let segment = ClipSegment {
        title: "Broken".to_string(),
        start: "00:20".to_string(),
        end: "00:10".to_string(),
        description: String::new(),
    };
    let err = segment.to_request("talk.mp4").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidRequest);

    let garbled = ClipSegment {
        start: "ab:cd".to_string(),
        ..segment
    };
    assert_eq!(
        garbled.to_request("talk.mp4").unwrap_err().kind(),
        ErrorKind::InvalidRequest
    );
}

#[test]
fn test_export_state_terminal() {
    assert!(ExportState::Done.is_terminal());
    assert!(ExportState::Cancelled.is_terminal());
    assert!(ExportState::Failed(ErrorKind::InvalidSource).is_terminal());
    assert!(!ExportState::EncodingAudio.is_terminal());
}
