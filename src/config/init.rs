// ABOUTME: Config scaffolding for new installations.
// ABOUTME: Creates crishim.yml template files.

use std::path::Path;

use crate::error::{Error, Result};

use super::{CONFIG_FILENAME, Config};

pub fn init_config(dir: &Path, force: bool) -> Result<()> {
    let config_path = dir.join(CONFIG_FILENAME);

    if config_path.exists() && !force {
        return Err(Error::AlreadyExists(config_path));
    }

    let yaml = generate_template_yaml(&Config::template());
    std::fs::write(&config_path, yaml)?;

    Ok(())
}

fn generate_template_yaml(config: &Config) -> String {
    format!(
        r#"root_dir: {}
state_dir: {}
log_level: {}
stream:
  # Base address of attach URLs handed to clients
  address: {}
  token_ttl: {}
engine:
  # How long a forced delete waits for the killed process
  kill_grace: {}
"#,
        config.root_dir.display(),
        config.state_dir.display(),
        config.log_level,
        config.stream.address,
        humantime_serde::re::humantime::format_duration(config.stream.token_ttl),
        humantime_serde::re::humantime::format_duration(config.engine.kill_grace),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn template_parses_back_to_defaults() {
        let yaml = generate_template_yaml(&Config::template());
        let parsed = Config::from_yaml(&yaml).unwrap();
        assert_eq!(parsed.root_dir, Config::template().root_dir);
        assert_eq!(parsed.stream.token_ttl, Config::template().stream.token_ttl);
        assert_eq!(parsed.engine.kill_grace, Config::template().engine.kill_grace);
    }
}
