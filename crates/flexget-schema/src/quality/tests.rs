use super::*;

#[test]
fn test_parse_quality() {
    let q = Quality::parse("720p HDTV x264").unwrap();
    assert_eq!(q.get(ComponentKind::Resolution).unwrap().name, "720p");
    assert_eq!(q.get(ComponentKind::Source).unwrap().name, "hdtv");
    assert_eq!(q.get(ComponentKind::Codec).unwrap().name, "h264");
    assert_eq!(q.to_string(), "720p hdtv h264");
}

#[test]
fn test_parse_quality_rejects_unknown_words() {
    assert!(Quality::parse("720p sparkly").is_err());
    assert!(Quality::parse("720p 1080p").is_err());
}

#[test]
fn test_scan_title() {
    let q = Quality::scan("Some.Show.S01E02.1080p.WEB-DL.x265-GROUP");
    assert_eq!(q.get(ComponentKind::Resolution).unwrap().name, "1080p");
    assert_eq!(q.get(ComponentKind::Source).unwrap().name, "web-dl");
    assert_eq!(q.get(ComponentKind::Codec).unwrap().name, "h265");
    assert!(Quality::scan("nothing to see").is_unknown());
}

#[test]
fn test_requirements_range_and_negation() {
    let req = Requirements::parse("720p-1080p !cam").unwrap();
    assert!(req.allows(&Quality::parse("720p hdtv").unwrap()));
    assert!(req.allows(&Quality::parse("1080p bluray").unwrap()));
    assert!(!req.allows(&Quality::parse("2160p bluray").unwrap()));
    assert!(!req.allows(&Quality::parse("720p cam").unwrap()));
    assert!(!req.allows(&Quality::parse("hdtv").unwrap()));
}

#[test]
fn test_requirements_comparisons_and_alternatives() {
    let req = Requirements::parse(">=720p h264|h265").unwrap();
    assert!(req.allows(&Quality::parse("720p h264").unwrap()));
    assert!(req.allows(&Quality::parse("2160p h265").unwrap()));
    assert!(!req.allows(&Quality::parse("480p h264").unwrap()));
    assert!(!req.allows(&Quality::parse("1080p xvid").unwrap()));

    let strict = Requirements::parse("<1080p").unwrap();
    assert!(strict.allows(&Quality::parse("720p").unwrap()));
    assert!(!strict.allows(&Quality::parse("1080p").unwrap()));
}

#[test]
fn test_requirements_any_and_invalid() {
    assert!(Requirements::parse("any").unwrap().allows(&Quality::default()));
    assert!(Requirements::parse("720p-hdtv").is_err());
    assert!(Requirements::parse("720p|h264").is_err());
    assert!(Requirements::parse("superhd").is_err());
}
