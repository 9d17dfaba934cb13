use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// Root configuration script
    #[arg(default_value = ".ggyp")]
    pub config: PathBuf,
    /// Seed a global var; VALUE is read as JSON when it parses, else as a string
    #[arg(short = 'D', long = "define", value_name = "KEY=VALUE", value_parser = parse_define)]
    pub defines: Vec<(String, serde_json::Value)>,
    /// Print the documents instead of writing them
    #[arg(long)]
    pub dry_run: bool,
}

/// `KEY=VALUE` with a JSON or plain string value.
pub fn parse_define(raw: &str) -> Result<(String, serde_json::Value), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got `{raw}`"))?;
    if key.is_empty() {
        return Err(format!("empty key in `{raw}`"));
    }
    let value = serde_json::from_str(value)
        .unwrap_or_else(|_| serde_json::Value::String(value.to_string()));
    Ok((key.to_string(), value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_define() {
        let test_cases = [
            ("OS=linux", Ok(("OS".to_string(), json!("linux")))),
            ("debug=true", Ok(("debug".to_string(), json!(true)))),
            ("jobs=4", Ok(("jobs".to_string(), json!(4)))),
            ("flags=[\"-g\"]", Ok(("flags".to_string(), json!(["-g"])))),
            ("empty=", Ok(("empty".to_string(), json!("")))),
            ("eq=a=b", Ok(("eq".to_string(), json!("a=b")))),
            ("novalue", Err("expected KEY=VALUE, got `novalue`".to_string())),
            ("=1", Err("empty key in `=1`".to_string())),
        ];

        for (input, expected) in test_cases {
            assert_eq!(parse_define(input), expected, "input: {input}");
        }
    }

    #[test]
    fn test_cli_defaults() {
        let cli = Cli::parse_from(["ggyp"]);
        assert_eq!(cli.config, PathBuf::from(".ggyp"));
        assert!(cli.defines.is_empty());
        assert!(!cli.dry_run);

        let cli = Cli::parse_from(["ggyp", "root.ggyp", "-D", "a=1", "--define", "b=x", "--dry-run"]);
        assert_eq!(cli.config, PathBuf::from("root.ggyp"));
        assert_eq!(
            cli.defines,
            vec![("a".to_string(), json!(1)), ("b".to_string(), json!("x"))]
        );
        assert!(cli.dry_run);
    }
}
