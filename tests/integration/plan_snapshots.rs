//! Snapshots of the ffmpeg arguments equivalent to a planned configuration

use insta::assert_snapshot;

use crate::common::{builtin_pipeline, desc};

fn planned_args(config: &str) -> String {
    let mut pipeline = builtin_pipeline(config);
    let active = pipeline.prepare(&desc(64, 32, 25.0)).unwrap();
    active.settings.to_ffmpeg_args().join(" ")
}

#[test]
fn snapshot_x264_bitrate() {
    assert_snapshot!(
        planned_args("codec=H264:bitrate=2M:threads=no"),
        @"-c:v libx264 -pix_fmt yuv420p -s 64x32 -r 25/1 -g 20 -bf 0 -strict -2 -b:v 2000000 -bt 480000 -maxrate 2000000 -bufsize 200000 -qmin 0 -qmax 69 -qdiff 69 -qcomp 0 -refs 1 -threads 1 -slices 32 -colorspace bt709 -color_range tv -tune zerolatency,fastdecode -intra-refresh 1 -x264-params keyint=20 -preset veryfast"
    );
}

#[test]
fn snapshot_mjpeg_default_qp() {
    assert_snapshot!(
        planned_args("codec=MJPEG:threads=no"),
        @"-c:v mjpeg -pix_fmt yuv420p -s 64x32 -r 25/1 -g 20 -bf 0 -strict -2 -qmin 21 -qmax 21 -flags +qscale -threads 1 -slices 32 -colorspace bt709 -color_range tv -huffman default"
    );
}

#[test]
fn snapshot_vaapi_uses_software_upload_format() {
    assert_snapshot!(
        planned_args("encoder=hevc_vaapi"),
        @"-c:v hevc_vaapi -pix_fmt nv12 -s 64x32 -r 25/1 -g 20 -bf 0 -strict -2 -flags +qscale -threads 1 -slices 32 -colorspace bt709 -color_range tv -qp 21"
    );
}
