use std::io::Write;

use aes::{
    cipher::{generic_array::GenericArray, BlockEncrypt, KeyInit},
    Aes256,
};
use base64::{engine::general_purpose::STANDARD, Engine};
use flate2::{write::ZlibEncoder, Compression};
use md5::{Digest, Md5};
use wiremock::{
    matchers::{method, path},
    Mock, MockServer, ResponseTemplate,
};

pub const NONCE: &str = "b7f04c2e-91d3-4d1e";
pub const AES_KEY: [u8; 32] = [0x5a; 32];
pub const CONTENT_KEY: [u8; 16] = *b"0123456789abcdef";
pub const INIT: &[u8] = b"ftyp|moov|";

pub fn segment_body(number: u64) -> Vec<u8> {
    format!("moof+mdat#{number}|").into_bytes()
}

/// `init ++ seg1 ++ … ++ segN`
pub fn expected_track(count: u64) -> Vec<u8> {
    let mut track = INIT.to_vec();
    for number in 1..=count {
        track.extend(segment_body(number));
    }
    track
}

/// Audio-only MPD with two-second segments.
pub fn mpd(seconds: u64) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<MPD xmlns="urn:mpeg:dash:schema:mpd:2011" type="static" mediaPresentationDuration="PT{seconds}S" minBufferTime="PT2S" profiles="urn:mpeg:dash:profile:isoff-live:2011">
  <Period id="0" start="PT0S">
    <AdaptationSet id="0" contentType="audio" mimeType="audio/mp4" lang="en">
      <Representation id="a0" bandwidth="128000" codecs="mp4a.40.2" audioSamplingRate="48000">
        <SegmentTemplate timescale="48000" duration="96000" startNumber="1" initialization="$RepresentationID$/init.mp4" media="$RepresentationID$/seg_$Number$.m4s"/>
      </Representation>
    </AdaptationSet>
  </Period>
</MPD>"#
    )
}

/// 8-byte header followed by the zlib-compressed manifest JSON.
pub fn container(playlist_url: &str, envelope: Option<&str>) -> Vec<u8> {
    let json = serde_json::json!({
        "type": "audio",
        "playlists": [
            { "type": "preview", "language": "en", "url": "preview.mpd" },
            { "type": "main", "language": "en", "url": playlist_url },
        ],
        "ev": envelope,
    });

    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(json.to_string().as_bytes())
        .expect("compress container");
    let compressed = encoder.finish().expect("compress container");

    let mut data = b"BLURL\0\0\x01".to_vec();
    data.extend(compressed);
    data
}

pub fn wrap_key(aes_key: &[u8; 32], content_key: &[u8; 16]) -> [u8; 16] {
    let cipher = Aes256::new_from_slice(aes_key).expect("valid AES-256 key");
    let mut block = GenericArray::clone_from_slice(content_key);
    cipher.encrypt_block(&mut block);

    let mut wrapped = [0u8; 16];
    wrapped.copy_from_slice(&block);
    wrapped
}

pub fn envelope(nonce: &str, wrapped_key: &[u8; 16]) -> String {
    let mut bytes = vec![1, 0, nonce.len() as u8, 0, 0];
    bytes.extend_from_slice(nonce.as_bytes());
    bytes.extend_from_slice(wrapped_key);
    STANDARD.encode(bytes)
}

/// One 0x34-byte key store record, matching `nonce` or deliberately not.
pub fn key_record(salt: [u8; 4], nonce: &str, aes_key: &[u8; 32], matching: bool) -> Vec<u8> {
    let mut hasher = Md5::new();
    hasher.update(salt);
    hasher.update(nonce.as_bytes());
    let checksum = hasher.finalize()[0];

    let mut record = salt.to_vec();
    record.push(if matching { checksum } else { !checksum });
    record.extend_from_slice(&[0u8; 15]);
    record.extend_from_slice(aes_key);
    record
}

/// A key store holding a decoy record before the real one.
pub fn key_store() -> Vec<u8> {
    let mut store = key_record([9, 9, 9, 9], NONCE, &[0x11; 32], false);
    store.extend(key_record([1, 2, 3, 4], NONCE, &AES_KEY, true));
    store
}

/// Serve `init.mp4` and segments `1..=count` under `{prefix}/a0/`.
///
/// `HEAD` answers for every segment; `GET` of `missing` returns 404.
pub async fn mount_segments(server: &MockServer, prefix: &str, count: u64, missing: Option<u64>) {
    Mock::given(method("GET"))
        .and(path(format!("{prefix}/a0/init.mp4")))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(INIT))
        .mount(server)
        .await;

    for number in 1..=count {
        let segment_path = format!("{prefix}/a0/seg_{number}.m4s");
        Mock::given(method("HEAD"))
            .and(path(segment_path.as_str()))
            .respond_with(ResponseTemplate::new(200))
            .mount(server)
            .await;

        if missing != Some(number) {
            Mock::given(method("GET"))
                .and(path(segment_path.as_str()))
                .respond_with(ResponseTemplate::new(200).set_body_bytes(segment_body(number)))
                .mount(server)
                .await;
        }
    }
}

pub async fn mount_body(server: &MockServer, at: &str, body: Vec<u8>) {
    Mock::given(method("GET"))
        .and(path(at))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(body))
        .mount(server)
        .await;
}
