use super::*;
use std::fs;
use tempfile::TempDir;

#[cfg(test)]
mod integration_tests {
    use super::*;

    #[test]
    fn config_file_persistence() {
        let temp_dir = TempDir::new().expect("should create TempDir successfully");
        let config_path = temp_dir.path().join("config.toml");

        let original_config = Config {
            ollama: OllamaConfig {
                protocol: "https".to_string(),
                host: "test-host".to_string(),
                port: 8080,
                embedding_model: "nomic-embed-text:latest".to_string(),
                embedding_dimension: 768,
                chat_model: "mistral:latest".to_string(),
                ..OllamaConfig::default()
            },
            ..Config::default()
        };

        let toml_content = toml::to_string_pretty(&original_config)
            .expect("config should convert to toml string successfully");
        fs::write(&config_path, toml_content).expect("should write to config_path successfully");

        let content =
            fs::read_to_string(&config_path).expect("should read from config_path successfully");
        let loaded_config: Config = toml::from_str(&content).expect("should parse toml correctly");

        assert_eq!(original_config, loaded_config);
    }

    #[test]
    fn invalid_toml_handling() {
        let invalid_toml = "[ollama\nhost = ";
        let result: Result<Config, toml::de::Error> = toml::from_str(invalid_toml);
        assert!(result.is_err());
    }

    #[test]
    fn complete_valid_config() {
        let valid_toml = r#"
            [ollama]
            protocol = "http"
            host = "localhost"
            port = 11434
            embedding_model = "nomic-embed-text:latest"
            embedding_dimension = 768
            chat_model = "llama3:latest"
            batch_size = 64

            [chunking]
            chunk_size = 1000
            chunk_overlap = 100

            [corpus]
            data_dirs = ["agendas", "minutes"]
            json_pointer = "/items"
            require_directories = true

            [memory]
            max_turns = 0
        "#;

        let config: Config = toml::from_str(valid_toml).expect("should parse toml successfully");
        assert!(config.validate().is_ok());
        assert_eq!(config.ollama.embedding_dimension, 768);
        assert_eq!(config.ollama.batch_size, 64);
        assert_eq!(config.chunking.chunk_size, 1000);
        assert_eq!(config.corpus.data_dirs.len(), 2);
        assert_eq!(config.corpus.json_pointer.as_deref(), Some("/items"));
        assert!(config.corpus.require_directories);
        assert_eq!(config.memory.max_turns, 0);
    }

    #[test]
    fn empty_host_is_invalid() {
        let config = Config {
            ollama: OllamaConfig {
                host: String::new(),
                port: 80,
                ..OllamaConfig::default()
            },
            ..Config::default()
        };

        assert!(config.validate().is_err());
    }

    #[test]
    fn port_boundary_validation() {
        let mut config = OllamaConfig::default();

        assert!(config.set_port(1).is_ok());
        assert!(config.set_port(65535).is_ok());
        assert!(config.set_port(0).is_err());
    }

    #[test]
    fn ollama_url_generation_with_different_hosts() {
        let configs = vec![
            ("http", "localhost", 11434, "http://localhost:11434/"),
            ("http", "127.0.0.1", 8080, "http://127.0.0.1:8080/"),
            (
                "https",
                "secure.example.com",
                443,
                "https://secure.example.com/",
            ),
        ];

        for (protocol, host, port, expected_url) in configs {
            let config = Config {
                ollama: OllamaConfig {
                    protocol: protocol.to_string(),
                    host: host.to_string(),
                    port,
                    ..OllamaConfig::default()
                },
                ..Config::default()
            };

            let url = config.ollama_url().expect("ollama_url is ok");
            assert_eq!(url.as_str(), expected_url);
        }
    }

    #[test]
    fn error_display_messages() {
        let errors = vec![
            ConfigError::InvalidProtocol("ftp".to_string()),
            ConfigError::InvalidPort(0),
            ConfigError::InvalidBatchSize(0),
            ConfigError::InvalidModel(String::new()),
            ConfigError::InvalidUrl("invalid-url".to_string()),
            ConfigError::OverlapTooLarge(200, 100),
            ConfigError::InvalidTopK(0),
        ];

        for error in errors {
            let message = format!("{error}");
            assert!(message.len() > 10);
        }
    }
}
