// AVI muxer - MJPEG video + PCM16 audio in a RIFF container
//
// Layout:
//   RIFF 'AVI '
//     LIST 'hdrl'
//       avih                              main header (56 bytes)
//       LIST 'strl' strh 'vids' + strf    BITMAPINFOHEADER, 'MJPG'
//       LIST 'strl' strh 'auds' + strf    WAVEFORMATEX, PCM
//     LIST 'movi'
//       00dc / 01wb chunks, interleaved per video frame
//     idx1                                offsets relative to the 'movi' fourcc
//
// Every chunk is padded to an even length; the size field holds the
// unpadded length.

use std::path::Path;
use std::time::Duration;

use crate::error::MediaError;
use crate::recording::capture::CapturedStreams;

pub const AVI_MIME: &str = "video/x-msvideo";

const AVIF_HASINDEX: u32 = 0x10;
const AVIIF_KEYFRAME: u32 = 0x10;
const WAVE_FORMAT_PCM: u16 = 1;

/// Finished, playable video file held in memory
#[derive(Debug, Clone)]
pub struct VideoArtifact {
    pub bytes: Vec<u8>,
    pub mime: &'static str,
    pub frame_count: usize,
    pub width: u32,
    pub height: u32,
    pub duration: Duration,
}

impl VideoArtifact {
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn write_to<P: AsRef<Path>>(&self, path: P) -> Result<(), MediaError> {
        std::fs::write(path, &self.bytes)?;
        Ok(())
    }
}

struct IndexEntry {
    id: [u8; 4],
    offset: u32,
    size: u32,
}

/// Mux captured streams into an AVI file.
pub fn mux(streams: &CapturedStreams) -> Result<VideoArtifact, MediaError> {
    if streams.video_frames.is_empty() {
        return Err(MediaError::EncodeFailed {
            reason: "no video frames to mux".to_string(),
        });
    }
    if streams.width == 0 || streams.height == 0 || streams.fps == 0 {
        return Err(MediaError::EncodeFailed {
            reason: format!(
                "invalid video geometry {}x{} @ {} fps",
                streams.width, streams.height, streams.fps
            ),
        });
    }
    let has_audio = streams.channels > 0 && streams.sample_rate > 0;
    let block_align = streams.channels as u32 * 2;

    // movi payload, starting with its list type so idx1 offsets line up
    let mut movi = Vec::new();
    movi.extend_from_slice(b"movi");
    let mut index = Vec::new();
    let mut max_video = 0usize;
    let mut max_audio = 0usize;

    let total_frames = streams.video_frames.len();
    let audio_frames = if has_audio { streams.audio_frames() } else { 0 };
    for (i, jpeg) in streams.video_frames.iter().enumerate() {
        index.push(IndexEntry {
            id: *b"00dc",
            offset: movi.len() as u32,
            size: jpeg.len() as u32,
        });
        write_chunk(&mut movi, b"00dc", jpeg);
        max_video = max_video.max(jpeg.len());

        if audio_frames > 0 {
            let start = audio_boundary(i, streams, audio_frames);
            let end = if i + 1 == total_frames {
                audio_frames
            } else {
                audio_boundary(i + 1, streams, audio_frames)
            };
            if end > start {
                let bytes = &streams.audio[start * block_align as usize..end * block_align as usize];
                index.push(IndexEntry {
                    id: *b"01wb",
                    offset: movi.len() as u32,
                    size: bytes.len() as u32,
                });
                write_chunk(&mut movi, b"01wb", bytes);
                max_audio = max_audio.max(bytes.len());
            }
        }
    }

    let hdrl = header_list(streams, has_audio, audio_frames as u32, max_video as u32, max_audio as u32);

    let mut idx1 = Vec::with_capacity(index.len() * 16);
    for entry in &index {
        idx1.extend_from_slice(&entry.id);
        put_u32(&mut idx1, AVIIF_KEYFRAME);
        put_u32(&mut idx1, entry.offset);
        put_u32(&mut idx1, entry.size);
    }

    let mut body = Vec::with_capacity(hdrl.len() + movi.len() + idx1.len() + 32);
    body.extend_from_slice(b"AVI ");
    write_chunk(&mut body, b"LIST", &hdrl);
    write_chunk(&mut body, b"LIST", &movi);
    write_chunk(&mut body, b"idx1", &idx1);

    let mut bytes = Vec::with_capacity(body.len() + 8);
    write_chunk(&mut bytes, b"RIFF", &body);

    log::info!(
        "[Muxer] {} video frames, {} audio frames, {} bytes",
        total_frames,
        audio_frames,
        bytes.len()
    );

    Ok(VideoArtifact {
        bytes,
        mime: AVI_MIME,
        frame_count: total_frames,
        width: streams.width,
        height: streams.height,
        duration: streams.duration(),
    })
}

/// First audio frame belonging to video frame `i`.
fn audio_boundary(i: usize, streams: &CapturedStreams, audio_frames: usize) -> usize {
    ((i as u64 * streams.sample_rate as u64) / streams.fps as u64).min(audio_frames as u64) as usize
}

fn header_list(
    streams: &CapturedStreams,
    has_audio: bool,
    audio_frames: u32,
    max_video: u32,
    max_audio: u32,
) -> Vec<u8> {
    let block_align = streams.channels as u32 * 2;
    let bytes_per_sec = streams.sample_rate * block_align;
    let frames = streams.video_frames.len() as u32;

    let mut hdrl = Vec::new();
    hdrl.extend_from_slice(b"hdrl");

    let mut avih = Vec::with_capacity(56);
    put_u32(&mut avih, 1_000_000 / streams.fps);
    put_u32(&mut avih, max_video.saturating_mul(streams.fps).saturating_add(bytes_per_sec));
    put_u32(&mut avih, 0); // padding granularity
    put_u32(&mut avih, AVIF_HASINDEX);
    put_u32(&mut avih, frames);
    put_u32(&mut avih, 0); // initial frames
    put_u32(&mut avih, if has_audio { 2 } else { 1 });
    put_u32(&mut avih, max_video.max(max_audio));
    put_u32(&mut avih, streams.width);
    put_u32(&mut avih, streams.height);
    avih.extend_from_slice(&[0u8; 16]);
    write_chunk(&mut hdrl, b"avih", &avih);

    // Video stream
    let mut strl = Vec::new();
    strl.extend_from_slice(b"strl");
    let strh = stream_header(StreamHeader {
        kind: *b"vids",
        handler: *b"MJPG",
        scale: 1,
        rate: streams.fps,
        length: frames,
        buffer: max_video,
        sample_size: 0,
        width: streams.width,
        height: streams.height,
    });
    write_chunk(&mut strl, b"strh", &strh);
    let mut strf = Vec::with_capacity(40);
    put_u32(&mut strf, 40);
    put_u32(&mut strf, streams.width);
    put_u32(&mut strf, streams.height);
    put_u16(&mut strf, 1); // planes
    put_u16(&mut strf, 24); // bit count
    strf.extend_from_slice(b"MJPG");
    put_u32(&mut strf, streams.width * streams.height * 3);
    strf.extend_from_slice(&[0u8; 16]);
    write_chunk(&mut strl, b"strf", &strf);
    write_chunk(&mut hdrl, b"LIST", &strl);

    if has_audio {
        let mut strl = Vec::new();
        strl.extend_from_slice(b"strl");
        let strh = stream_header(StreamHeader {
            kind: *b"auds",
            handler: [0; 4],
            scale: block_align,
            rate: bytes_per_sec,
            length: audio_frames,
            buffer: max_audio,
            sample_size: block_align,
            width: 0,
            height: 0,
        });
        write_chunk(&mut strl, b"strh", &strh);
        let mut strf = Vec::with_capacity(18);
        put_u16(&mut strf, WAVE_FORMAT_PCM);
        put_u16(&mut strf, streams.channels);
        put_u32(&mut strf, streams.sample_rate);
        put_u32(&mut strf, bytes_per_sec);
        put_u16(&mut strf, block_align as u16);
        put_u16(&mut strf, 16);
        put_u16(&mut strf, 0); // cbSize
        write_chunk(&mut strl, b"strf", &strf);
        write_chunk(&mut hdrl, b"LIST", &strl);
    }

    hdrl
}

struct StreamHeader {
    kind: [u8; 4],
    handler: [u8; 4],
    scale: u32,
    rate: u32,
    length: u32,
    buffer: u32,
    sample_size: u32,
    width: u32,
    height: u32,
}

fn stream_header(header: StreamHeader) -> Vec<u8> {
    let mut strh = Vec::with_capacity(56);
    strh.extend_from_slice(&header.kind);
    strh.extend_from_slice(&header.handler);
    put_u32(&mut strh, 0); // flags
    put_u16(&mut strh, 0); // priority
    put_u16(&mut strh, 0); // language
    put_u32(&mut strh, 0); // initial frames
    put_u32(&mut strh, header.scale);
    put_u32(&mut strh, header.rate);
    put_u32(&mut strh, 0); // start
    put_u32(&mut strh, header.length);
    put_u32(&mut strh, header.buffer);
    put_u32(&mut strh, u32::MAX); // quality: driver default
    put_u32(&mut strh, header.sample_size);
    put_u16(&mut strh, 0);
    put_u16(&mut strh, 0);
    put_u16(&mut strh, header.width.min(u16::MAX as u32) as u16);
    put_u16(&mut strh, header.height.min(u16::MAX as u32) as u16);
    strh
}

fn write_chunk(out: &mut Vec<u8>, id: &[u8; 4], data: &[u8]) {
    out.extend_from_slice(id);
    put_u32(out, data.len() as u32);
    out.extend_from_slice(data);
    if data.len() % 2 == 1 {
        out.push(0);
    }
}

fn put_u32(out: &mut Vec<u8>, value: u32) {
    out.extend_from_slice(&value.to_le_bytes());
}

fn put_u16(out: &mut Vec<u8>, value: u16) {
    out.extend_from_slice(&value.to_le_bytes());
}
