use anyhow::{Context, Result, bail};
use chrono::Local;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use merge_core::{Language, MergeConfig, MergeError};
use merge_docs::csv::write_mapping_csv;
use merge_docs::docx::generate_starter_template;
use merge_docs::mapping::strip_row_prefix;
use merge_docs::package::{archive_name, package_zip, write_to_dir};
use merge_docs::xlsx::generate_empty_data_file;
use merge_docs::{
    DataTable, FieldMap, FieldMapping, MergeJob, TableValues, Template, build_context,
    create_safe_filename,
    generate_batch, generate_single, propose_mapping, render_preview, unmatched_columns,
    validate_before_generation,
};

use crate::cli::{
    BlankArgs, Cli, Commands, ConfigCommand, FieldsArgs, GenerateArgs, MapArgs, MappingArgs,
    PreviewArgs, SingleArgs, StarterArgs, TemplateArg,
};

/// Settings for one invocation: stored config with global flags applied.
pub struct Session {
    pub config: MergeConfig,
    pub language: Language,
}

impl Session {
    pub fn new(config: MergeConfig, cli: &Cli) -> Self {
        let language = cli.language.unwrap_or(config.language);
        Self { config, language }
    }
}

pub fn run(cli: Cli, session: Session) -> Result<()> {
    match cli.command {
        Commands::Fields(args) => fields(&args),
        Commands::Validate(args) => validate(&args),
        Commands::Map(args) => map(&args),
        Commands::Preview(args) => preview(&args, &session),
        Commands::Generate(args) => generate(&args, &session),
        Commands::Single(args) => single(&args, &session),
        Commands::Blank(args) => blank(&args),
        Commands::Starter(args) => starter(&args),
        Commands::Config(cmd) => config(cmd, session.config),
    }
}

// ---------------------------------------------------------------------------
// Shared helpers
// ---------------------------------------------------------------------------

/// Template fields plus the proposal and the final mapping after overrides.
struct ResolvedMapping {
    fields: Vec<String>,
    proposal: Vec<FieldMapping>,
    map: FieldMap,
    square: Vec<String>,
}

fn resolve_mapping(template: &Template, table: &DataTable, args: &MappingArgs) -> Result<ResolvedMapping> {
    let placeholders = template.extract_placeholders();
    let proposal = propose_mapping(&placeholders.curly, table);
    let mut map = FieldMap::from_proposal(&proposal);

    if let Some(path) = &args.mapping_file {
        map.load_overrides(path)?;
    }
    for spec in &args.overrides {
        map.apply_override(spec, table)?;
    }

    let square = if args.all_square {
        placeholders.square.clone()
    } else {
        for name in &args.square {
            if !placeholders.square.contains(name) {
                warn!("[{name}] does not occur in the template");
            }
        }
        args.square.clone()
    };

    Ok(ResolvedMapping {
        fields: placeholders.curly,
        proposal,
        map,
        square,
    })
}

/// Data file with trimmed headers and spaces turned into underscores, so
/// `First Name` is addressed as `First_Name` everywhere.
fn load_data(path: &Path) -> Result<DataTable> {
    let mut table = DataTable::load(path)?;
    table.normalize_column_names();
    Ok(table)
}

fn parse_pairs(pairs: &[String]) -> Result<Vec<(String, String)>> {
    pairs
        .iter()
        .map(|pair| {
            let (field, value) = pair.split_once('=').ok_or_else(|| {
                MergeError::Config(format!("'{pair}' must look like field=value"))
            })?;
            Ok((field.trim().to_string(), value.to_string()))
        })
        .collect()
}

/// `dir/<file stem><suffix>` next to `source`.
fn sibling_path(source: &Path, suffix: &str) -> PathBuf {
    let stem = source
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("mailmerge");
    source.with_file_name(format!("{stem}{suffix}"))
}

fn write_file(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }
    std::fs::write(path, bytes).with_context(|| format!("Failed to write {}", path.display()))
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

fn fields(args: &FieldsArgs) -> Result<()> {
    let template = Template::open(&args.template)?;
    let placeholders = template.extract_placeholders();

    if args.json {
        println!("{}", serde_json::to_string_pretty(&placeholders)?);
        return Ok(());
    }

    println!("Fields ({}):", placeholders.curly.len());
    for field in &placeholders.curly {
        println!("  {{{{ {field} }}}}");
    }
    if !placeholders.square.is_empty() {
        println!("Optional fields ({}):", placeholders.square.len());
        for field in &placeholders.square {
            println!("  [{field}]");
        }
    }
    if template.detect_macros() {
        println!("Note: the template defines macros; they are not executed.");
    }
    Ok(())
}

fn validate(args: &TemplateArg) -> Result<()> {
    let template = Template::open(&args.template)?;
    let messages = validate_before_generation(&template);
    if messages.is_empty() {
        println!("{}: no problems found", args.template.display());
        return Ok(());
    }
    for message in &messages {
        println!("{message}\n");
    }
    Err(MergeError::InvalidTemplate(format!("{} problem(s) found", messages.len())).into())
}

fn map(args: &MapArgs) -> Result<()> {
    let template = Template::open(&args.template)?;
    let table = load_data(&args.data)?;
    let resolved = resolve_mapping(&template, &table, &args.mapping)?;

    let width = resolved.fields.iter().map(|f| f.len()).max().unwrap_or(0);
    for (field, column) in resolved.map.iter() {
        let sample = column
            .and_then(|c| table.cell(0, c))
            .map(|v| v.to_string())
            .unwrap_or_default();
        match column {
            Some(c) => println!("  {field:<width$}  ->  {c}  ({sample})"),
            None => println!("  {field:<width$}  ->  (not mapped)"),
        }
    }

    let extra = unmatched_columns(&resolved.fields, &table);
    if !extra.is_empty() {
        println!("\nColumns not used by the template: {}", extra.join(", "));
    }

    if args.profile {
        println!("\nColumns:");
        for profile in table.profile_columns() {
            println!(
                "  {} ({:?}, {} filled, {:.0}% unique) e.g. {}",
                profile.name,
                profile.kind,
                profile.non_empty,
                profile.unique_ratio * 100.0,
                profile.sample
            );
        }
    }

    if let Some(path) = &args.save {
        write_file(path, resolved.map.to_json()?.as_bytes())?;
        println!("Mapping saved to {}", path.display());
    }
    if let Some(path) = &args.csv {
        let report: Vec<FieldMapping> = resolved
            .proposal
            .iter()
            .map(|m| {
                let column = resolved.map.column_for(&m.field).map(String::from);
                let sample = column
                    .as_deref()
                    .and_then(|c| table.cell(0, c))
                    .map(|v| v.to_string())
                    .unwrap_or_default();
                FieldMapping {
                    field: m.field.clone(),
                    column,
                    sample,
                }
            })
            .collect();
        write_file(path, write_mapping_csv(&report)?.as_bytes())?;
        println!("Mapping report written to {}", path.display());
    }
    Ok(())
}

fn preview(args: &PreviewArgs, session: &Session) -> Result<()> {
    let template = Template::open(&args.template)?;
    let table = load_data(&args.data)?;
    if args.row == 0 || args.row > table.rows.len() {
        bail!(MergeError::InvalidData(format!(
            "row {} does not exist (the data has {} rows)",
            args.row,
            table.rows.len()
        )));
    }

    let resolved = resolve_mapping(&template, &table, &args.mapping)?;
    let values = TableValues::new(&table, session.language);
    let ctx = build_context(
        &table,
        args.row - 1,
        &resolved.map,
        &resolved.square,
        &values,
        session.language,
        false,
    )?;
    println!("{}", render_preview(&template, &ctx, &resolved.square));
    Ok(())
}

fn generate(args: &GenerateArgs, session: &Session) -> Result<()> {
    let config = &session.config;
    let template = Template::open(&args.template)?;

    let problems = validate_before_generation(&template);
    if !problems.is_empty() {
        for message in &problems {
            eprintln!("{message}\n");
        }
        bail!(MergeError::InvalidTemplate(
            "fix the placeholders above before generating".into()
        ));
    }

    let table = load_data(&args.data)?;
    let resolved = resolve_mapping(&template, &table, &args.mapping)?;
    let unmapped = resolved.map.unmapped();
    if !unmapped.is_empty() {
        warn!("Fields without a column stay empty: {}", unmapped.join(", "));
    }

    let prefix = args.prefix.clone().unwrap_or_else(|| config.file_prefix.clone());
    let out_dir = match &args.out {
        Some(dir) => dir.clone(),
        None => MergeConfig {
            file_prefix: prefix.clone(),
            ..config.clone()
        }
        .default_output_dir()?,
    };
    let name_column = args
        .name_column
        .clone()
        .or_else(|| table.headers.first().cloned());

    let job = MergeJob {
        template: &template,
        data: &table,
        mapping: &resolved.map,
        square_fields: resolved.square.clone(),
        language: session.language,
        prefix: prefix.clone(),
        primary_column: name_column,
        secondary_column: args.fallback_column.clone(),
        strict: args.strict || config.strict,
        clean_empty: !args.keep_empty && config.clean_empty,
        date: Local::now().date_naive(),
    };
    let docs = generate_batch(&job)?;
    if docs.is_empty() {
        println!("The data file has no rows; nothing generated.");
        return Ok(());
    }

    if args.zip || config.zip_output {
        let path = out_dir.join(archive_name(&prefix, Local::now().naive_local()));
        write_file(&path, &package_zip(&docs)?)?;
        info!("Archive written to {}", path.display());
        println!("{} documents packed into {}", docs.len(), path.display());
    } else {
        let written = write_to_dir(&docs, &out_dir)?;
        println!("{} documents written to {}", written.len(), out_dir.display());
    }
    Ok(())
}

fn single(args: &SingleArgs, session: &Session) -> Result<()> {
    let config = &session.config;
    let template = Template::open(&args.template)?;

    let mut form: BTreeMap<String, String> = BTreeMap::new();
    if let Some(path) = &args.form_file {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read form file: {}", path.display()))?;
        let values: BTreeMap<String, String> = serde_json::from_str(&json)
            .map_err(|e| MergeError::Config(format!("invalid form file: {e}")))?;
        form.extend(values);
    }
    form.extend(parse_pairs(&args.values)?);

    let fields = template.extract_placeholders().curly;
    let missing: Vec<&str> = fields
        .iter()
        .map(|f| strip_row_prefix(f))
        .filter(|f| !form.contains_key(*f))
        .collect();
    if !missing.is_empty() {
        warn!("No value given for: {}", missing.join(", "));
    }

    let bytes = generate_single(
        &template,
        form.iter().map(|(k, v)| (k.as_str(), v.as_str())),
        !args.keep_empty && config.clean_empty,
    )?;
    let path = match &args.out {
        Some(path) => path.clone(),
        None => config.default_output_dir()?.join(create_safe_filename(
            &config.file_prefix,
            "",
            "",
            Local::now().date_naive(),
        )),
    };
    write_file(&path, &bytes)?;
    println!("Document written to {}", path.display());
    Ok(())
}

fn blank(args: &BlankArgs) -> Result<()> {
    let template = Template::open(&args.template)?;
    let mut fields: Vec<String> = Vec::new();
    for field in template.extract_placeholders().curly {
        let name = strip_row_prefix(&field).to_string();
        if !name.starts_with("total.") && !fields.contains(&name) {
            fields.push(name);
        }
    }

    let path = args
        .out
        .clone()
        .unwrap_or_else(|| sibling_path(&args.template, "_data.xlsx"));
    write_file(&path, &generate_empty_data_file(&fields)?)?;
    println!("Empty data file with {} columns written to {}", fields.len(), path.display());
    Ok(())
}

fn starter(args: &StarterArgs) -> Result<()> {
    let table = load_data(&args.data)?;
    let path = args
        .out
        .clone()
        .unwrap_or_else(|| sibling_path(&args.data, "_template.docx"));
    write_file(&path, &generate_starter_template(&args.title, &table.headers)?)?;
    println!("Starter template written to {}", path.display());
    Ok(())
}

fn config(cmd: ConfigCommand, mut config: MergeConfig) -> Result<()> {
    match cmd {
        ConfigCommand::Show => println!("{}", serde_json::to_string_pretty(&config)?),
        ConfigCommand::Path => println!("{}", MergeConfig::config_path()?.display()),
        ConfigCommand::Set { key, value } => {
            config.set(&key, &value)?;
            config.save()?;
            info!("Config updated: {key} = {value}");
            println!("{key} = {value}");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_pairs() {
        let pairs = parse_pairs(&["Name=Eve".into(), " City =a=b".into()]).unwrap();
        assert_eq!(
            pairs,
            vec![
                ("Name".to_string(), "Eve".to_string()),
                ("City".to_string(), "a=b".to_string())
            ]
        );
        assert!(parse_pairs(&["novalue".into()]).is_err());
    }

    #[test]
    fn test_sibling_path() {
        assert_eq!(
            sibling_path(Path::new("/tmp/letters/offer.docx"), "_data.xlsx"),
            PathBuf::from("/tmp/letters/offer_data.xlsx")
        );
    }

    #[test]
    fn test_blank_and_starter_round_trip() {
        let tmp = tempfile::tempdir().unwrap();
        let data = tmp.path().join("people.csv");
        std::fs::write(&data, "Name,City\nAlice,Utrecht\n").unwrap();

        starter(&StarterArgs {
            data: data.clone(),
            title: "Letter".into(),
            out: None,
        })
        .unwrap();
        let template_path = tmp.path().join("people_template.docx");
        assert!(template_path.exists());

        blank(&BlankArgs {
            template: template_path,
            out: None,
        })
        .unwrap();
        let blank = DataTable::load(&tmp.path().join("people_template_data.xlsx")).unwrap();
        assert_eq!(blank.headers, vec!["Name", "City"]);
        assert!(blank.is_empty());
    }

    #[test]
    fn test_generate_writes_documents() {
        let tmp = tempfile::tempdir().unwrap();
        let data = tmp.path().join("people.csv");
        std::fs::write(&data, "Name,City\nAlice,Utrecht\nBob,Gouda\n").unwrap();
        starter(&StarterArgs {
            data: data.clone(),
            title: "Letter".into(),
            out: None,
        })
        .unwrap();

        let out = tmp.path().join("out");
        let args = GenerateArgs {
            template: tmp.path().join("people_template.docx"),
            data,
            mapping: MappingArgs::default(),
            out: Some(out.clone()),
            prefix: Some("Letter".into()),
            name_column: Some("Name".into()),
            fallback_column: None,
            zip: false,
            strict: true,
            keep_empty: false,
        };
        let session = Session {
            config: MergeConfig::default(),
            language: Language::UK,
        };
        generate(&args, &session).unwrap();

        let mut names: Vec<String> = std::fs::read_dir(&out)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        assert_eq!(names.len(), 2);
        assert!(names[0].starts_with("Letter Alice "));
        assert!(names[1].starts_with("Letter Bob "));
    }

    #[test]
    fn test_generate_uses_normalized_headers() {
        let tmp = tempfile::tempdir().unwrap();
        let data = tmp.path().join("people.csv");
        std::fs::write(&data, " First Name ,Home City\nAlice,Utrecht\n").unwrap();
        starter(&StarterArgs {
            data: data.clone(),
            title: "Letter".into(),
            out: None,
        })
        .unwrap();

        let out = tmp.path().join("out");
        let args = GenerateArgs {
            template: tmp.path().join("people_template.docx"),
            data,
            mapping: MappingArgs {
                overrides: vec!["Home_City=Home_City".into()],
                ..MappingArgs::default()
            },
            out: Some(out.clone()),
            prefix: Some("Letter".into()),
            name_column: Some("First_Name".into()),
            fallback_column: None,
            zip: false,
            strict: true,
            keep_empty: false,
        };
        let session = Session {
            config: MergeConfig::default(),
            language: Language::UK,
        };
        generate(&args, &session).unwrap();

        let names: Vec<String> = std::fs::read_dir(&out)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names.len(), 1);
        assert!(names[0].starts_with("Letter Alice "));

        let doc = Template::open(&out.join(&names[0])).unwrap();
        let texts: Vec<String> = doc.paragraph_texts().collect();
        assert!(texts.contains(&"First_Name: Alice".to_string()));
        assert!(texts.contains(&"Home_City: Utrecht".to_string()));
    }
}
