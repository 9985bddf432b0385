use returns_submitter::config::Config;

#[test]
fn parse_example_config() {
    let raw = include_str!("../returns-submitter.example.toml");
    let cfg: Config = toml::from_str(raw).expect("parse TOML");
    cfg.validate().expect("example config is valid");
    let names: Vec<_> = cfg.returns.iter().map(|r| r.name.as_str()).collect();
    assert_eq!(names, ["Workforce", "Finance"]);
    assert!(cfg.api.url.ends_with('/'));
    assert!(!cfg.paths.csv_dir.is_empty());
}

#[test]
fn missing_sections_fall_back_to_defaults() {
    let raw = r#"
        [api]
        url = "http://localhost/"

        [[returns]]
        name = "Only"
        query = "select 1"
        token = "t"
    "#;
    let cfg: Config = toml::from_str(raw).expect("parse TOML");
    cfg.validate().unwrap();
    assert_eq!(cfg.database.port, 1433);
    assert_eq!(cfg.logging.level, "info");
    assert!(cfg.logging.write_to_file);
}

#[test]
fn load_rejects_config_without_returns() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("c.toml");
    std::fs::write(&path, "[api]\nurl = \"http://localhost/\"\n").unwrap();
    let err = Config::load(&path).unwrap_err();
    assert!(format!("{err:#}").contains("no [[returns]]"));
}
