//! Command-line presentation layer.
//!
//! Renders controller notices and component results as terminal output and
//! holds no business logic of its own.

use clap::{Parser, Subcommand};
use std::io::Write as _;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::io::AsyncBufReadExt;

use transcribe_desk::controller::{SessionController, SessionNotice};
use transcribe_desk::llm::{GeminiProvider, LlmProvider};
use transcribe_desk::session::Session;
use transcribe_desk::settings::{ConfigStore, Settings, LANGUAGES};
use transcribe_desk::stt::AssemblyAiProvider;
use transcribe_desk::{summary, upload};

#[derive(Parser)]
#[command(
    name = "transcribe-desk",
    about = "Desktop recording and transcription assistant",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Record from the microphone with live transcription (Enter stops)
    Record {
        /// Session name; defaults to a timestamp
        #[arg(long)]
        name: Option<String>,
    },
    /// Transcribe an audio or video file
    Upload {
        /// Media file to transcribe
        file: PathBuf,
        /// Session name; defaults to the file name
        #[arg(long)]
        name: Option<String>,
    },
    /// Clean up and summarize a session's transcript
    Summarize {
        /// Session name under the output directory
        session: String,
    },
    /// List LLM models available for summaries
    Models,
    /// List supported transcription languages
    Languages,
    /// Show or change settings
    Config {
        #[command(subcommand)]
        action: Option<ConfigAction>,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print current settings
    Show,
    /// Print the settings file path
    Path,
    /// Set one settings key
    Set { key: String, value: String },
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();

    let store = ConfigStore::new();
    let settings = store.load();

    match run(cli.command, settings, &store).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            eprintln!("Error: {message}");
            ExitCode::FAILURE
        }
    }
}

async fn run(command: Commands, settings: Settings, store: &ConfigStore) -> Result<(), String> {
    match command {
        Commands::Record { name } => record(name, settings).await,
        Commands::Upload { file, name } => upload_file(file, name, settings).await,
        Commands::Summarize { session } => summarize(session, settings).await,
        Commands::Models => list_models(settings).await,
        Commands::Languages => {
            for (label, code) in LANGUAGES {
                println!("{code:8} {label}");
            }
            Ok(())
        }
        Commands::Config { action } => configure(action, settings, store),
    }
}

async fn record(name: Option<String>, settings: Settings) -> Result<(), String> {
    if !settings.has_speech_credentials() {
        return Err(
            "Speech API key is not configured; set it with \
             `transcribe-desk config set speech_api_key <key>`"
                .to_string(),
        );
    }

    let provider = Arc::new(
        AssemblyAiProvider::new(settings.speech_api_key.clone()).map_err(|e| e.to_string())?,
    );
    let (controller, mut notices) = SessionController::new();

    let session = Session::new(name.as_deref(), &settings.output_dir);
    println!(
        "Session '{}' -> {}",
        session.name,
        session.transcript_path().display()
    );
    controller
        .start(session, &settings, provider)
        .map_err(|e| e.to_string())?;
    println!("Connecting... press Enter to stop.");

    let mut stdin = tokio::io::BufReader::new(tokio::io::stdin()).lines();
    let mut stopping = false;

    loop {
        tokio::select! {
            line = stdin.next_line(), if !stopping => {
                let _ = line;
                stopping = true;
                clear_partial_line();
                println!("Stopping...");
                // A capture-task error can end the session concurrently; the
                // terminal notice below is authoritative either way.
                if let Err(e) = controller.request_stop().await {
                    log::debug!("Stop request: {e}");
                }
            }
            notice = notices.recv() => {
                match notice {
                    Some(SessionNotice::Started { session_name }) => {
                        println!("Recording '{session_name}'.");
                    }
                    Some(SessionNotice::Partial(text)) => {
                        // Provisional text: live display only, overwritten in
                        // place and never persisted.
                        eprint!("\r{text:<70.70}");
                        let _ = std::io::stderr().flush();
                    }
                    Some(SessionNotice::Final(text)) => {
                        clear_partial_line();
                        println!("{text}");
                    }
                    Some(SessionNotice::Stopped { session_name, error }) => {
                        clear_partial_line();
                        return match error {
                            Some(e) => Err(format!("Session '{session_name}' ended: {e}")),
                            None => {
                                println!("Session '{session_name}' stopped.");
                                Ok(())
                            }
                        };
                    }
                    None => return Ok(()),
                }
            }
        }
    }
}

fn clear_partial_line() {
    eprint!("\r{:<70}\r", "");
    let _ = std::io::stderr().flush();
}

async fn upload_file(
    file: PathBuf,
    name: Option<String>,
    settings: Settings,
) -> Result<(), String> {
    let provider =
        AssemblyAiProvider::new(settings.speech_api_key.clone()).map_err(|e| e.to_string())?;
    let session = Session::for_media_file(name.as_deref(), &file, &settings.output_dir);

    println!("Transcribing {}...", file.display());
    let text = upload::transcribe_media_file(&file, &session, &settings, &provider)
        .await
        .map_err(|e| e.to_string())?;

    println!("{text}");
    println!("Transcript saved to {}", session.transcript_path().display());
    Ok(())
}

async fn summarize(session_name: String, settings: Settings) -> Result<(), String> {
    if !settings.has_llm_credentials() {
        return Err(
            "LLM API key is not configured; set it with \
             `transcribe-desk config set llm_api_key <key>`"
                .to_string(),
        );
    }

    let session = Session::new(Some(&session_name), &settings.output_dir);
    let provider = GeminiProvider::new(settings.llm_api_key.clone(), settings.model.clone());

    println!("Generating summary with {}...", settings.model);
    let path = summary::generate_summary(&session, &settings, &provider)
        .await
        .map_err(|e| e.to_string())?;

    let text = std::fs::read_to_string(&path).map_err(|e| e.to_string())?;
    println!("{text}");
    println!("Summary saved to {}", path.display());
    Ok(())
}

async fn list_models(settings: Settings) -> Result<(), String> {
    let provider = GeminiProvider::new(settings.llm_api_key.clone(), settings.model.clone());
    for model in provider.list_models().await {
        let marker = if model == settings.model { "*" } else { " " };
        println!("{marker} {model}");
    }
    Ok(())
}

fn configure(
    action: Option<ConfigAction>,
    mut settings: Settings,
    store: &ConfigStore,
) -> Result<(), String> {
    match action.unwrap_or(ConfigAction::Show) {
        ConfigAction::Show => {
            println!("Settings file: {}", store.path().display());
            println!("  speech_api_key:    {}", mask(&settings.speech_api_key));
            println!("  llm_api_key:       {}", mask(&settings.llm_api_key));
            println!("  output_dir:        {}", settings.output_dir.display());
            println!("  model:             {}", settings.model);
            println!("  language_code:     {}", settings.language_code);
            println!("  speaker_labels:    {}", settings.speaker_labels);
            println!(
                "  custom_vocabulary: {}",
                if settings.custom_vocabulary.is_empty() {
                    "(none)".to_string()
                } else {
                    settings.custom_vocabulary.join(", ")
                }
            );
            println!(
                "  cleanup_prompt:    {} chars",
                settings.cleanup_prompt.len()
            );
            Ok(())
        }
        ConfigAction::Path => {
            println!("{}", store.path().display());
            Ok(())
        }
        ConfigAction::Set { key, value } => {
            match key.as_str() {
                "speech_api_key" => settings.speech_api_key = value,
                "llm_api_key" => settings.llm_api_key = value,
                "output_dir" => settings.output_dir = PathBuf::from(value),
                "model" => settings.model = value,
                "cleanup_prompt" => settings.cleanup_prompt = value,
                "custom_vocabulary" => {
                    settings.custom_vocabulary = Settings::parse_vocabulary(&value)
                }
                "speaker_labels" => {
                    settings.speaker_labels = value
                        .parse()
                        .map_err(|_| "speaker_labels must be true or false".to_string())?
                }
                "language_code" => {
                    if !LANGUAGES.iter().any(|(_, code)| *code == value) {
                        return Err(format!(
                            "Unknown language code '{value}'; see `transcribe-desk languages`"
                        ));
                    }
                    settings.language_code = value;
                }
                other => {
                    return Err(format!(
                        "Unknown settings key '{other}'. Keys: speech_api_key, llm_api_key, \
                         output_dir, model, cleanup_prompt, custom_vocabulary, speaker_labels, \
                         language_code"
                    ));
                }
            }
            store.save(&settings).map_err(|e| e.to_string())?;
            println!("Saved.");
            Ok(())
        }
    }
}

fn mask(key: &str) -> &'static str {
    if key.trim().is_empty() {
        "(not set)"
    } else {
        "(set)"
    }
}
