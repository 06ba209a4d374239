use std::path::PathBuf;

use anyhow::{anyhow, bail, Context};
use dotenvy::dotenv;
use tracing::info;

mod config;
mod errors;
mod intake;
mod llm;
mod scene;
mod utils;

use config::CONFIG;
use scene::{ArtStyle, GenerationOptions, ARTISTIC_STYLES};
use utils::logging::init_logging;

fn usage() -> String {
    let styles: Vec<&str> = ARTISTIC_STYLES.iter().map(|style| style.label()).collect();
    format!(
        "Usage: prompt_studio --image <path> [--style <name>] [--creativity <0..1>] \
         [--negative-prompt <text>] [--generate] [--output <path> | --data-url] [--api-key <key>]\n\
         \x20      prompt_studio --prompt <text> --generate [--output <path>] [--api-key <key>]\n\n\
         Analyzes an image into an optimized narrative prompt and optionally renders a new\n\
         image from it. --prompt skips analysis and generates from an (edited) prompt directly.\n\n\
         Styles: {}\n\
         The API key falls back to GEMINI_API_KEY from the environment or .env.",
        styles.join(", ")
    )
}

#[derive(Debug)]
struct CliArgs {
    image: Option<PathBuf>,
    prompt: Option<String>,
    style: ArtStyle,
    creativity: Option<f32>,
    negative_prompt: Option<String>,
    generate: bool,
    output: PathBuf,
    emit_data_url: bool,
    api_key: Option<String>,
    help: bool,
}

fn parse_args(args: &[String]) -> anyhow::Result<CliArgs> {
    let mut parsed = CliArgs {
        image: None,
        prompt: None,
        style: ArtStyle::Photorealistic,
        creativity: None,
        negative_prompt: None,
        generate: false,
        output: PathBuf::from("generated.png"),
        emit_data_url: false,
        api_key: None,
        help: false,
    };

    let mut index = 0;
    while index < args.len() {
        let flag = args[index].as_str();
        let take_value = |index: &mut usize| -> anyhow::Result<String> {
            *index += 1;
            args.get(*index)
                .cloned()
                .ok_or_else(|| anyhow!("{} requires a value", flag))
        };

        match flag {
            "--image" => parsed.image = Some(PathBuf::from(take_value(&mut index)?)),
            "--prompt" => parsed.prompt = Some(take_value(&mut index)?),
            "--style" => {
                let value = take_value(&mut index)?;
                parsed.style = ArtStyle::parse(&value)
                    .ok_or_else(|| anyhow!("Unknown style '{}'", value))?;
            }
            "--creativity" => {
                let value = take_value(&mut index)?;
                let creativity = value
                    .parse::<f32>()
                    .map_err(|_| anyhow!("--creativity expects a number, got '{}'", value))?;
                parsed.creativity = Some(creativity);
            }
            "--negative-prompt" => parsed.negative_prompt = Some(take_value(&mut index)?),
            "--generate" => parsed.generate = true,
            "--output" => parsed.output = PathBuf::from(take_value(&mut index)?),
            "--data-url" => parsed.emit_data_url = true,
            "--api-key" => parsed.api_key = Some(take_value(&mut index)?),
            "-h" | "--help" => parsed.help = true,
            other => bail!("Unknown argument '{}'", other),
        }
        index += 1;
    }

    if parsed.help {
        return Ok(parsed);
    }
    match (&parsed.image, &parsed.prompt) {
        (None, None) => bail!("Either --image or --prompt is required"),
        (Some(_), Some(_)) => bail!("--image and --prompt are mutually exclusive"),
        (None, Some(prompt)) => {
            if prompt.trim().is_empty() {
                bail!("--prompt must not be empty");
            }
            if !parsed.generate {
                bail!("--prompt does nothing without --generate");
            }
        }
        (Some(_), None) => {}
    }

    Ok(parsed)
}

fn resolve_api_key(cli_key: Option<&str>) -> String {
    cli_key
        .map(|key| key.trim().to_string())
        .filter(|key| !key.is_empty())
        .unwrap_or_else(|| CONFIG.gemini_api_key.trim().to_string())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    let _logging_guards = init_logging();

    let raw_args: Vec<String> = std::env::args().skip(1).collect();
    let args = match parse_args(&raw_args) {
        Ok(args) => args,
        Err(err) => {
            eprintln!("{err}\n\n{}", usage());
            std::process::exit(2);
        }
    };
    if args.help {
        println!("{}", usage());
        return Ok(());
    }

    let api_key = resolve_api_key(args.api_key.as_deref());

    let narrative = match (&args.image, &args.prompt) {
        (Some(image_path), None) => {
            let payload = intake::load_image(image_path).await?;
            let options = {
                let mut options = GenerationOptions::new(args.style)
                    .with_negative_prompt(args.negative_prompt.clone());
                if let Some(creativity) = args.creativity {
                    options = options.with_creativity(creativity);
                }
                options
            };
            info!(
                "Analyzing {} (style={}, creativity={})",
                image_path.display(),
                options.style,
                options.creativity
            );
            let descriptor = llm::analyze_image(&payload.to_data_url(), &options, &api_key).await?;
            descriptor.completed(options.style).narrative()
        }
        (None, Some(prompt)) => prompt.trim().to_string(),
        _ => unreachable!("validated in parse_args"),
    };

    // The prompt is the copyable result surface; logs go to stderr and files.
    println!("{narrative}");

    if args.generate {
        info!("Generating image from prompt ({} chars)", narrative.len());
        let image = llm::generate_image(&narrative, &api_key).await?;
        if args.emit_data_url {
            println!("{}", image.to_data_url());
        } else {
            tokio::fs::write(&args.output, &image.bytes)
                .await
                .with_context(|| format!("Failed to write {}", args.output.display()))?;
            info!(
                "Saved generated image to {} ({} bytes, {})",
                args.output.display(),
                image.bytes.len(),
                image.mime_type
            );
            eprintln!("Saved generated image to {}", args.output.display());
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(values: &[&str]) -> Vec<String> {
        values.iter().map(|value| value.to_string()).collect()
    }

    #[test]
    fn image_with_style_and_controls_parses() {
        let parsed = parse_args(&args(&[
            "--image",
            "cat.png",
            "--style",
            "cinematic",
            "--creativity",
            "0.4",
            "--negative-prompt",
            "blurry",
            "--generate",
        ]))
        .unwrap();
        assert_eq!(parsed.image, Some(PathBuf::from("cat.png")));
        assert_eq!(parsed.style, ArtStyle::Cinematic);
        assert_eq!(parsed.creativity, Some(0.4));
        assert!(parsed.generate);
    }

    #[test]
    fn image_and_prompt_are_mutually_exclusive() {
        let err = parse_args(&args(&["--image", "a.png", "--prompt", "x", "--generate"]));
        assert!(err.is_err());
    }

    #[test]
    fn prompt_requires_generate() {
        assert!(parse_args(&args(&["--prompt", "a fox"])).is_err());
        assert!(parse_args(&args(&["--prompt", "a fox", "--generate"])).is_ok());
    }

    #[test]
    fn unknown_style_is_rejected() {
        let err = parse_args(&args(&["--image", "a.png", "--style", "cubism"]));
        assert!(err.unwrap_err().to_string().contains("Unknown style"));
    }

    #[test]
    fn missing_flag_value_is_reported() {
        let err = parse_args(&args(&["--image"]));
        assert!(err.unwrap_err().to_string().contains("requires a value"));
    }
}
