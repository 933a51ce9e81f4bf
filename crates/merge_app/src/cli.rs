use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use merge_core::Language;

/// Fill a Word template with every row of a spreadsheet.
#[derive(Parser, Debug)]
#[command(name = "mailmerge", version, about, long_about = None)]
pub struct Cli {
    /// Language for dates and numbers (UK, US or NL). Defaults to the config.
    #[arg(long, short, global = true, env = "MAILMERGE_LANGUAGE")]
    pub language: Option<Language>,

    /// Log level for console and log file (error, warn, info, debug, trace)
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List the placeholders of a template
    Fields(FieldsArgs),

    /// Check a template for placeholder mistakes
    Validate(TemplateArg),

    /// Propose a field to column mapping for a template and data file
    Map(MapArgs),

    /// Show the text of one merged row without writing files
    Preview(PreviewArgs),

    /// Generate one document per data row
    Generate(GenerateArgs),

    /// Generate one document from values given on the command line
    Single(SingleArgs),

    /// Write an empty spreadsheet with the template's fields as columns
    Blank(BlankArgs),

    /// Write a starter template with a placeholder for every data column
    Starter(StarterArgs),

    /// Show or change the stored settings
    #[command(subcommand)]
    Config(ConfigCommand),
}

#[derive(Args, Debug)]
pub struct TemplateArg {
    /// Word template (.docx)
    pub template: PathBuf,
}

#[derive(Args, Debug)]
pub struct FieldsArgs {
    /// Word template (.docx)
    pub template: PathBuf,

    /// Print JSON instead of a list
    #[arg(long)]
    pub json: bool,
}

/// How template fields are tied to data columns.
#[derive(Args, Debug, Default)]
pub struct MappingArgs {
    /// Override a mapping: `field=column` (empty column unmaps the field)
    #[arg(long = "map", value_name = "FIELD=COLUMN")]
    pub overrides: Vec<String>,

    /// JSON file with `{ "field": "column" }` entries
    #[arg(long, value_name = "FILE")]
    pub mapping_file: Option<PathBuf>,

    /// Fill in this `[Square]` field (repeatable)
    #[arg(long = "square", value_name = "NAME")]
    pub square: Vec<String>,

    /// Fill in every `[Square]` field of the template
    #[arg(long, conflicts_with = "square")]
    pub all_square: bool,
}

#[derive(Args, Debug)]
pub struct MapArgs {
    /// Word template (.docx)
    pub template: PathBuf,

    /// Data file (.xlsx, .xls, .ods, .csv, .tsv)
    pub data: PathBuf,

    #[command(flatten)]
    pub mapping: MappingArgs,

    /// Save the resulting mapping as JSON
    #[arg(long, value_name = "FILE")]
    pub save: Option<PathBuf>,

    /// Write the mapping report as CSV
    #[arg(long, value_name = "FILE")]
    pub csv: Option<PathBuf>,

    /// Also describe every data column
    #[arg(long)]
    pub profile: bool,
}

#[derive(Args, Debug)]
pub struct PreviewArgs {
    /// Word template (.docx)
    pub template: PathBuf,

    /// Data file (.xlsx, .xls, .ods, .csv, .tsv)
    pub data: PathBuf,

    /// Data row to preview, starting at 1
    #[arg(long, default_value_t = 1)]
    pub row: usize,

    #[command(flatten)]
    pub mapping: MappingArgs,
}

#[derive(Args, Debug)]
pub struct GenerateArgs {
    /// Word template (.docx)
    pub template: PathBuf,

    /// Data file (.xlsx, .xls, .ods, .csv, .tsv)
    pub data: PathBuf,

    #[command(flatten)]
    pub mapping: MappingArgs,

    /// Output directory
    #[arg(long, short)]
    pub out: Option<PathBuf>,

    /// File name prefix
    #[arg(long)]
    pub prefix: Option<String>,

    /// Column whose value names each file
    #[arg(long, value_name = "COLUMN")]
    pub name_column: Option<String>,

    /// Column used when the name column is empty
    #[arg(long, value_name = "COLUMN")]
    pub fallback_column: Option<String>,

    /// Write a single ZIP archive instead of separate files
    #[arg(long)]
    pub zip: bool,

    /// Fail on unmapped fields and non-numeric amounts
    #[arg(long)]
    pub strict: bool,

    /// Keep paragraphs and rows that end up empty
    #[arg(long)]
    pub keep_empty: bool,
}

#[derive(Args, Debug)]
pub struct SingleArgs {
    /// Word template (.docx)
    pub template: PathBuf,

    /// Field value: `field=value` (repeatable)
    #[arg(long = "set", value_name = "FIELD=VALUE")]
    pub values: Vec<String>,

    /// JSON file with `{ "field": "value" }` entries
    #[arg(long, value_name = "FILE")]
    pub form_file: Option<PathBuf>,

    /// Output file (defaults to `<prefix> <date>.docx` in the output directory)
    #[arg(long, short)]
    pub out: Option<PathBuf>,

    /// Keep paragraphs that end up empty
    #[arg(long)]
    pub keep_empty: bool,
}

#[derive(Args, Debug)]
pub struct BlankArgs {
    /// Word template (.docx)
    pub template: PathBuf,

    /// Output spreadsheet (defaults to `<template>_data.xlsx`)
    #[arg(long, short)]
    pub out: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct StarterArgs {
    /// Data file (.xlsx, .xls, .ods, .csv, .tsv)
    pub data: PathBuf,

    /// Heading of the template
    #[arg(long, default_value = "Template")]
    pub title: String,

    /// Output template (defaults to `<data>_template.docx`)
    #[arg(long, short)]
    pub out: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Print the current settings
    Show,
    /// Print where the settings are stored
    Path,
    /// Change a setting
    Set {
        /// language, file_prefix, output_dir, zip_output, strict, clean_empty, log_level or log_dir
        key: String,
        value: String,
    },
}
