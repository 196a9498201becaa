use super::{json_pretty, load_config, EXIT_SUCCESS};
use kiln_schema::Manifest;
use std::path::Path;

pub fn run(config: &Path, json: bool) -> Result<u8, String> {
    let project = load_config(config)?;

    if json {
        let payload = serde_json::json!({
            "config": config.display().to_string(),
            "update_mode": project.engine.update_mode.to_string(),
            "manifests": project.manifests.iter().map(describe).collect::<Vec<_>>(),
        });
        println!("{}", json_pretty(&payload)?);
        return Ok(EXIT_SUCCESS);
    }

    println!(
        "{}: {} manifest(s), update mode {}",
        config.display(),
        project.manifests.len(),
        project.engine.update_mode
    );
    for m in &project.manifests {
        let image = m
            .image
            .as_ref()
            .map_or_else(String::new, |i| format!("  image {}", i.image_ref));
        println!(
            "  {:<16} {:<8} {:<7}{image}",
            m.name,
            m.deploy_kind(),
            m.trigger_mode
        );
    }
    Ok(EXIT_SUCCESS)
}

fn describe(m: &Manifest) -> serde_json::Value {
    serde_json::json!({
        "name": m.name,
        "deploy": m.deploy_kind(),
        "trigger": m.trigger_mode,
        "image": m.image.as_ref().map(|i| i.image_ref.to_string()),
        "live_update_rules": m.image.as_ref().map_or(0, |i| i.sync.len()),
        "watch": m.watch_paths,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn describe_compose_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kiln.toml");
        fs::write(
            &path,
            r#"config_version = 1

[[manifest]]
name = "db"
trigger = "manual"
[manifest.compose]
service = "db"
"#,
        )
        .unwrap();

        let project = load_config(&path).unwrap();
        let value = describe(&project.manifests[0]);
        assert_eq!(value["name"], "db");
        assert_eq!(value["deploy"], "compose");
        assert_eq!(value["trigger"], "manual");
        assert!(value["image"].is_null());
    }
}
