use super::*;
use tempfile::TempDir;

#[test]
fn default_config() {
    let config = Config::default();
    assert_eq!(config.ollama.protocol, "http");
    assert_eq!(config.ollama.host, "localhost");
    assert_eq!(config.ollama.port, 11434);
    assert_eq!(config.ollama.batch_size, 16);
    assert_eq!(config.ollama.retry_attempts, 1);
    assert_eq!(config.chunking.chunk_size, 1200);
    assert_eq!(config.chunking.chunk_overlap, 150);
    assert_eq!(config.retrieval.top_k, 5);
    assert_eq!(config.corpus.data_dirs.len(), 3);
}

#[test]
fn config_validation() {
    let config = Config::default();
    assert!(config.validate().is_ok());

    let mut invalid_config = config.clone();
    invalid_config.ollama.protocol = "ftp".to_string();
    assert!(invalid_config.validate().is_err());

    let mut invalid_config = config.clone();
    invalid_config.ollama.port = 0;
    assert!(invalid_config.validate().is_err());

    let mut invalid_config = config.clone();
    invalid_config.ollama.embedding_model = String::new();
    assert!(invalid_config.validate().is_err());

    let mut invalid_config = config.clone();
    invalid_config.ollama.chat_model = "   ".to_string();
    assert!(invalid_config.validate().is_err());

    let mut invalid_config = config.clone();
    invalid_config.ollama.batch_size = 1001;
    assert!(invalid_config.validate().is_err());

    let mut invalid_config = config.clone();
    invalid_config.retrieval.top_k = 0;
    assert!(matches!(
        invalid_config.validate(),
        Err(ConfigError::InvalidTopK(0))
    ));

    let mut invalid_config = config.clone();
    invalid_config.corpus.data_dirs.clear();
    assert!(matches!(
        invalid_config.validate(),
        Err(ConfigError::NoDataDirectories)
    ));

    let mut invalid_config = config;
    invalid_config.corpus.json_pointer = Some("items".to_string());
    assert!(matches!(
        invalid_config.validate(),
        Err(ConfigError::InvalidJsonPointer(_))
    ));
}

#[test]
fn chunk_overlap_must_be_smaller_than_size() {
    let mut config = Config::default();
    config.chunking.chunk_size = 500;
    config.chunking.chunk_overlap = 500;
    assert!(matches!(
        config.validate(),
        Err(ConfigError::OverlapTooLarge(500, 500))
    ));

    config.chunking.chunk_overlap = 499;
    assert!(config.validate().is_ok());
}

#[test]
fn ollama_url_generation() {
    let config = Config::default();
    let url = config
        .ollama_url()
        .expect("should generate ollama_url successfully");
    assert_eq!(url.as_str(), "http://localhost:11434/");
}

#[test]
fn https_url_generation() {
    let mut config = Config::default();
    config.ollama.protocol = "https".to_string();
    config.ollama.host = "secure.example.com".to_string();
    config.ollama.port = 443;

    let url = config
        .ollama_url()
        .expect("should generate https url successfully");
    assert_eq!(url.as_str(), "https://secure.example.com/");
}

#[test]
fn toml_serialization() {
    let config = Config::default();
    let toml_str = toml::to_string(&config).expect("should serialize toml correctly");
    let parsed_config: Config = toml::from_str(&toml_str).expect("should parse toml correctly");
    assert_eq!(config, parsed_config);
}

#[test]
fn partial_toml_uses_defaults() {
    let parsed: Config = toml::from_str(
        r#"
        [ollama]
        chat_model = "mistral:latest"

        [retrieval]
        top_k = 3
        "#,
    )
    .expect("should parse partial toml");

    assert_eq!(parsed.ollama.chat_model, "mistral:latest");
    assert_eq!(parsed.ollama.port, 11434);
    assert_eq!(parsed.retrieval.top_k, 3);
    assert_eq!(parsed.chunking, ChunkingConfig::default());
}

#[test]
fn setter_validation() {
    let mut config = OllamaConfig::default();

    assert!(config.set_protocol("https".to_string()).is_ok());
    assert!(config.set_host("example.com".to_string()).is_ok());
    assert!(config.set_port(8080).is_ok());
    assert!(config.set_embedding_model("nomic-embed-text".to_string()).is_ok());
    assert!(config.set_chat_model("phi3".to_string()).is_ok());
    assert!(config.set_batch_size(128).is_ok());
    assert!(config.set_embedding_dimension(768).is_ok());

    assert!(config.set_protocol("ftp".to_string()).is_err());
    assert!(config.set_protocol("HTTP".to_string()).is_err());
    assert!(config.set_port(0).is_err());
    assert!(config.set_embedding_model(String::new()).is_err());
    assert!(config.set_chat_model(String::new()).is_err());
    assert!(config.set_batch_size(0).is_err());
    assert!(config.set_embedding_dimension(4).is_err());

    assert_eq!(config.protocol, "https");
    assert_eq!(config.port, 8080);
    assert_eq!(config.embedding_dimension, 768);
}

#[test]
fn load_missing_config_returns_defaults() {
    let temp_dir = TempDir::new().expect("should create temp dir");

    let config = Config::load(temp_dir.path()).expect("should load defaults");

    assert_eq!(config.get_base_dir(), temp_dir.path());
    assert_eq!(config.ollama, OllamaConfig::default());
    assert_eq!(config.catalog_path(), temp_dir.path().join("catalog.db"));
    assert_eq!(config.vector_database_path(), temp_dir.path().join("vectors"));
}

#[test]
fn save_and_reload() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let mut config = Config::load(temp_dir.path()).expect("should load defaults");
    config.ollama.chat_model = "mistral:latest".to_string();
    config.memory.max_turns = 4;

    config.save().expect("should save config");
    assert!(config.config_file_path().exists());

    let reloaded = Config::load(temp_dir.path()).expect("should reload config");
    assert_eq!(reloaded, config);
}

#[test]
fn load_rejects_invalid_file() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    fs::write(
        temp_dir.path().join("config.toml"),
        "[chunking]\nchunk_size = 200\nchunk_overlap = 300\n",
    )
    .expect("should write config");

    assert!(Config::load(temp_dir.path()).is_err());
}

#[test]
fn relative_data_dirs_resolve_against_base_dir() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let mut config = Config::load(temp_dir.path()).expect("should load defaults");
    let absolute = temp_dir.path().join("elsewhere");
    config.corpus.data_dirs = vec![PathBuf::from("data/pdfs"), absolute.clone()];

    let resolved = config.resolved_data_dirs();
    assert_eq!(resolved[0], temp_dir.path().join("data/pdfs"));
    assert_eq!(resolved[1], absolute);
}
