use super::*;

fn image_record(phash: Option<&str>) -> ImageRecord {
    ImageRecord {
        id: 1,
        snapshot_id: 1,
        image_url: "https://img.example.com/a.jpg".to_string(),
        phash: phash.map(str::to_string),
        thumbnail: None,
        position_index: 0,
    }
}

#[test]
fn new_snapshot_fingerprints_text() {
    let snapshot = NewPageSnapshot::new(
        "https://example.com/".to_string(),
        "93.184.216.34".to_string(),
        "<p>abc</p>".to_string(),
        "abc".to_string(),
    );

    assert_eq!(snapshot.fingerprint, content_fingerprint("abc"));
    assert_eq!(snapshot.fingerprint.len(), 64);
}

#[test]
fn identical_text_gives_identical_fingerprint() {
    let first = NewPageSnapshot::new(
        "https://example.com/".to_string(),
        String::new(),
        "<div>same</div>".to_string(),
        "same".to_string(),
    );
    let second = NewPageSnapshot::new(
        "https://example.com/".to_string(),
        String::new(),
        "<p>same</p>".to_string(),
        "same".to_string(),
    );

    assert_eq!(first.fingerprint, second.fingerprint);
}

#[test]
fn image_record_hash_parsing() {
    assert_eq!(
        image_record(Some("00000000000000ff")).perceptual_hash(),
        Some(PerceptualHash::from_bits(0xff))
    );
    assert_eq!(image_record(Some("")).perceptual_hash(), None);
    assert_eq!(image_record(None).perceptual_hash(), None);
    assert_eq!(image_record(Some("not-a-hash")).perceptual_hash(), None);
}

#[test]
fn image_record_serialization_omits_thumbnail() {
    let mut record = image_record(Some("00000000000000ff"));
    record.thumbnail = Some(vec![1, 2, 3]);

    let json = serde_json::to_value(&record).expect("record serializes");

    assert!(json.get("thumbnail").is_none());
    assert_eq!(json["phash"], "00000000000000ff");
}
