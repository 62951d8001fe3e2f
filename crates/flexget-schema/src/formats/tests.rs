use super::*;
use serde_json::json;

#[test]
fn test_builtin_formats_registered() {
    let formats = FormatRegistry::new();
    for name in [
        "quality",
        "quality_requirements",
        "time",
        "interval",
        "size",
        "percent",
        "regex",
        "file",
        "path",
        "url",
        "episode_identifier",
        "episode_or_season_id",
        "file_template",
    ] {
        assert!(formats.contains(name), "missing format {}", name);
    }
    assert!(!formats.contains("cron_schedule"));
}

#[test]
fn test_interval_and_size() {
    let formats = FormatRegistry::new();
    assert!(formats.check("interval", &json!("3 days")).is_ok());
    assert!(formats.check("interval", &json!("3days")).is_err());
    assert!(formats.check("size", &json!("100 MB")).is_ok());
    assert!(formats.check("size", &json!(1024)).is_ok());
    assert!(formats.check("size", &json!("big")).is_err());
}

#[test]
fn test_non_applicable_types_pass() {
    let formats = FormatRegistry::new();
    assert!(formats.check("interval", &json!(5)).is_ok());
    assert!(formats.check("url", &json!(["x"])).is_ok());
    assert!(formats.check("size", &json!(null)).is_ok());
}

#[test]
fn test_unknown_format_passes() {
    let formats = FormatRegistry::new();
    assert!(formats.check("no_such_format", &json!("anything")).is_ok());
}

#[test]
fn test_url() {
    let formats = FormatRegistry::new();
    assert!(formats.check("url", &json!("https://example.com/rss")).is_ok());
    assert!(formats.check("url", &json!("socks5h://proxy:1080")).is_ok());
    assert!(formats.check("url", &json!("{{ base }}/feed")).is_ok());
    let err = formats.check("url", &json!("example.com")).unwrap_err();
    assert_eq!(err, "`example.com` is not a valid url");
}

#[test]
fn test_regex_and_quality() {
    let formats = FormatRegistry::new();
    assert!(formats.check("regex", &json!("^foo.*bar$")).is_ok());
    assert!(formats.check("regex", &json!("(unclosed")).is_err());
    assert!(formats.check("quality", &json!("720p hdtv")).is_ok());
    assert!(formats.check("quality", &json!("720p sparkly")).is_err());
    assert!(formats
        .check("quality_requirements", &json!("720p-1080p !cam"))
        .is_ok());
}

#[test]
fn test_file_and_path() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("config.yml");
    std::fs::write(&file, "tasks: {}").unwrap();
    let formats = FormatRegistry::new();

    let file_str = file.to_string_lossy().into_owned();
    let dir_str = dir.path().to_string_lossy().into_owned();
    assert!(formats.check("file", &json!(file_str)).is_ok());
    assert!(formats.check("file", &json!(dir_str.clone())).is_err());
    assert!(formats.check("path", &json!(dir_str.clone())).is_ok());
    assert!(formats.check("path", &json!(file_str)).is_err());

    let templated = format!("{}/{{{{ series_name }}}}/season", dir_str);
    assert!(formats.check("path", &json!(templated)).is_ok());
    let missing = format!("{}/nope/{{{{ series_name }}}}", dir_str);
    assert!(formats.check("path", &json!(missing)).is_err());
}

#[test]
fn test_file_template() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("default.template"), "{title}").unwrap();
    let formats = FormatRegistry::new();

    assert!(formats.check("file_template", &json!("anything")).is_ok());
    assert!(formats.check("file_template", &json!("")).is_err());

    formats.set_template_dirs(vec![dir.path().to_path_buf()]);
    assert!(formats.check("file_template", &json!("default")).is_ok());
    assert!(formats.check("file_template", &json!("missing")).is_err());
}

#[test]
fn test_custom_format() {
    let formats = FormatRegistry::new();
    formats.register(
        "even",
        Arc::new(|value: &Value| match value.as_i64() {
            Some(n) if n % 2 != 0 => Err(format!("{} is odd", n)),
            _ => Ok(()),
        }),
    );
    assert!(formats.check("even", &json!(4)).is_ok());
    assert_eq!(formats.check("even", &json!(3)).unwrap_err(), "3 is odd");
}
