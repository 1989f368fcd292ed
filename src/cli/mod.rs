use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "modelmarkt")]
#[command(version, about = "A registry for uploaded ML models with subprocess inference", long_about = None)]
pub struct Cli {
	#[command(subcommand)]
	pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
	/// Start the HTTP API server
	Serve {
		/// Port to listen on
		#[arg(long, default_value = "3001", env = "PORT")]
		port: u16,

		/// Host to bind to
		#[arg(long, default_value = "0.0.0.0")]
		host: String,
	},

	/// List registered models
	List {
		/// Case-insensitive filter on name or description
		#[arg(long)]
		search: Option<String>,

		#[arg(long, default_value = "1")]
		page: usize,

		#[arg(long, default_value = "20")]
		limit: usize,
	},

	/// Show a single model record
	Show {
		id: String,
	},

	/// Copy a model artifact into the registry and create its record
	Register {
		/// Path to a .keras, .h5, .pt or .onnx file
		artifact: PathBuf,

		#[arg(long)]
		name: String,

		#[arg(long, default_value = "")]
		description: String,

		/// One of image, text, json
		#[arg(long, default_value = "image")]
		input_type: String,

		/// Owner identity; omit for a public model
		#[arg(long)]
		owner: Option<String>,
	},

	/// Change a model's name or description
	Update {
		id: String,

		#[arg(long)]
		name: Option<String>,

		#[arg(long)]
		description: Option<String>,
	},

	/// Delete a model and its artifact
	Delete {
		id: String,
	},

	/// Run inference against a registered model
	Predict {
		id: String,

		/// Input payload handed to the interpreter
		input: PathBuf,

		/// Override the configured timeout, in milliseconds
		#[arg(long)]
		timeout_ms: Option<u64>,
	},

	/// Manage API keys
	ApiKey {
		#[command(subcommand)]
		action: ApiKeyCommand,
	},
}

#[derive(Subcommand)]
pub enum ApiKeyCommand {
	/// Issue a key for a user that has none
	Create { user: String },

	/// Replace (or issue) a user's key
	Regenerate { user: String },

	/// Print a user's key
	Show { user: String },

	/// Remove a user's key
	Revoke { user: String },
}
