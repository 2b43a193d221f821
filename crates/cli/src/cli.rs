use std::path::PathBuf;

use clap::{Parser, Subcommand};
use sketchforge_core::request::{DEFAULT_INFLUENCE, MAX_IMAGES};

#[derive(Parser)]
#[command(name = "sketchforge")]
#[command(about = "Render canvas sketches through a ComfyUI server")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Session id attached to submissions (default: random)
    #[arg(long, global = true)]
    pub session: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Render a sketch and print the result as JSON
    Render {
        /// Text prompt
        #[arg(long)]
        prompt: String,

        /// Sketch image to condition on (any format the image crate reads)
        #[arg(long)]
        input: PathBuf,

        /// Optional style label appended to the prompt
        #[arg(long, default_value = "")]
        style: String,

        /// How strongly the sketch constrains the render, 0..=1
        #[arg(long, default_value_t = DEFAULT_INFLUENCE)]
        influence: f64,

        /// Number of images to render
        #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u32).range(1..=MAX_IMAGES as i64))]
        count: u32,

        /// Optional reference image
        #[arg(long)]
        reference: Option<PathBuf>,

        /// Download rendered images into this directory
        #[arg(long)]
        output_dir: Option<PathBuf>,
    },

    /// Check that the ComfyUI server is reachable
    Check,
}
