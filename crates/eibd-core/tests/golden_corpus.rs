use eibd_core::lpdu::{decode_lpdu, LData, Lpdu};
use eibd_core::tpdu::Tpdu;
use eibd_core::{Apdu, Destination};
use std::fs;
use std::path::{Path, PathBuf};

fn fixture_dir() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("../../fixtures/golden")
        .canonicalize()
        .expect("fixture directory should be resolvable")
}

/// Hex bytes of one fixture; `#` starts a comment line.
fn read_hex(path: &Path) -> Vec<u8> {
    fs::read_to_string(path)
        .expect("fixture must be readable")
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .flat_map(str::split_whitespace)
        .map(|token| {
            u8::from_str_radix(token, 16)
                .unwrap_or_else(|_| panic!("invalid hex token '{token}' in {}", path.display()))
        })
        .collect()
}

/// Every fixture as `(file stem, raw bytes, decoded frame)`, sorted by name.
fn corpus() -> Vec<(String, Vec<u8>, LData)> {
    let mut paths = fs::read_dir(fixture_dir())
        .expect("fixture directory should exist")
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|p| p.extension().is_some_and(|ext| ext == "hex"))
        .collect::<Vec<_>>();
    paths.sort();
    assert!(!paths.is_empty(), "no fixtures found");

    paths
        .into_iter()
        .map(|path| {
            let name = path
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or_default()
                .to_owned();
            let bytes = read_hex(&path);
            let Lpdu::Data(frame) = decode_lpdu(&bytes) else {
                panic!("fixture {name} is not an L_Data frame");
            };
            (name, bytes, frame)
        })
        .collect()
}

#[test]
fn fixtures_are_valid_and_reencode() {
    for (name, bytes, frame) in corpus() {
        assert!(
            frame.valid_checksum && frame.valid_length,
            "fixture {name} failed frame validation"
        );
        assert_eq!(
            frame.to_bytes().unwrap(),
            bytes,
            "fixture {name} does not re-encode identically"
        );
        let tpdu = Tpdu::decode(&frame.data)
            .unwrap_or_else(|e| panic!("fixture {name} TPDU decode failed: {e:?}"));
        if let Tpdu::DataUnnumbered(apdu) | Tpdu::DataConnected { apdu, .. } = &tpdu {
            let decoded = Apdu::decode(apdu)
                .unwrap_or_else(|e| panic!("fixture {name} APDU decode failed: {e:?}"));
            assert!(
                !matches!(decoded, Apdu::Unknown(_)),
                "fixture {name} carries an unknown APDU"
            );
        }
    }
}

#[test]
fn fixture_names_describe_their_frames() {
    for (name, _, frame) in corpus() {
        let tpdu = Tpdu::decode(&frame.data).unwrap();
        if name.starts_with("group_") {
            assert!(matches!(frame.destination, Destination::Group(_)), "{name}");
            assert!(matches!(tpdu, Tpdu::DataUnnumbered(_)), "{name}");
        } else {
            assert!(matches!(frame.destination, Destination::Individual(_)), "{name}");
        }
        match name.as_str() {
            "ack_connected" => assert!(matches!(tpdu, Tpdu::Ack(_))),
            "connect_individual" => assert_eq!(tpdu, Tpdu::Connect),
            "memory_read_connected" => assert!(matches!(tpdu, Tpdu::DataConnected { .. })),
            _ => {}
        }
    }
}
