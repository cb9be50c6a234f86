use classpatch::jvm::class_file::ClassFile;
use classpatch::jvm;
use classpatch::patch::{
    self, ClassFileTransformer, InMemoryCatalog, Instrumenter, KnownSupertypes, LoaderId,
    Settings,
};

use clap::{command, value_parser, Arg, ArgAction, ArgMatches};
use std::borrow::Cow;
use std::fs;
use std::path::{Path, PathBuf};

/// Loader the offline classes are considered to come from (anything but the bootstrap loader)
const APPLICATION_LOADER: LoaderId = LoaderId(1);

fn main() -> Result<(), patch::Error> {
    env_logger::init();

    let matches = command!()
        .about("Rewrite JVM class files the way the load-time instrumentation would")
        .arg(
            Arg::new("output-dir")
                .long("output-dir")
                .value_name("DIR")
                .required(true)
                .value_parser(value_parser!(PathBuf))
                .help("Directory to write classes to (laid out by package)"),
        )
        .arg(flag("all-entities", "Bracket the constructors of every entity"))
        .arg(flag(
            "all-hash-codes",
            "Forward `hashCode` of plain classes to the instrumented implementation",
        ))
        .arg(flag("all-entity-applies", "Cache `apply` on every entity companion"))
        .arg(flag(
            "all-module-constructors",
            "Bracket module constructors and their lazy vals",
        ))
        .arg(class_list("trace-vals", "Trace the simple getters of this class"))
        .arg(class_list(
            "poison-equality",
            "Make cache equality of this class compare identity",
        ))
        .arg(class_list(
            "entity-base",
            "Classes directly extending this one are entities",
        ))
        .arg(
            Arg::new("CLASS_FILE")
                .help("Class files to rewrite")
                .required(true)
                .num_args(1..)
                .value_parser(value_parser!(PathBuf)),
        )
        .get_matches();

    let settings = Settings {
        instrument_all_entities: matches.get_flag("all-entities"),
        instrument_all_hash_codes: matches.get_flag("all-hash-codes"),
        instrument_all_entity_applies: matches.get_flag("all-entity-applies"),
        instrument_all_module_constructors: matches.get_flag("all-module-constructors"),
        ..Settings::default()
    };

    let catalog = InMemoryCatalog::new(settings.callouts.clone());
    for class_name in class_names(&matches, "trace-vals") {
        catalog.update(class_name, |class_patch| class_patch.trace_vals_as_nodes = true);
    }
    for class_name in class_names(&matches, "poison-equality") {
        catalog.update(class_name, |class_patch| class_patch.poison_cache_equality = true);
    }
    let entity_bases: KnownSupertypes = class_names(&matches, "entity-base").collect();
    let instrumenter = Instrumenter::new(settings, catalog, entity_bases);

    let output_dir = matches
        .get_one::<PathBuf>("output-dir")
        .expect("output directory is required");
    let inputs = matches
        .get_many::<PathBuf>("CLASS_FILE")
        .expect("class files are required");
    for input in inputs {
        rewrite_file(&instrumenter, input, output_dir)?;
    }

    Ok(())
}

fn flag(name: &'static str, help: &'static str) -> Arg {
    Arg::new(name)
        .long(name)
        .action(ArgAction::SetTrue)
        .help(help)
}

fn class_list(name: &'static str, help: &'static str) -> Arg {
    Arg::new(name)
        .long(name)
        .value_name("CLASS")
        .action(ArgAction::Append)
        .help(help)
}

fn class_names<'m>(matches: &'m ArgMatches, name: &str) -> impl Iterator<Item = &'m str> {
    matches
        .get_many::<String>(name)
        .into_iter()
        .flatten()
        .map(String::as_str)
}

fn rewrite_file(
    instrumenter: &impl ClassFileTransformer,
    input: &Path,
    output_dir: &Path,
) -> Result<(), patch::Error> {
    log::info!("Reading '{}'", input.display());
    let bytes = fs::read(input).map_err(jvm::Error::IoError)?;
    let class_name = ClassFile::parse(&bytes)?.class_name()?.to_owned();

    let output = instrumenter.transform(Some(APPLICATION_LOADER), &class_name, &bytes)?;
    if let Cow::Borrowed(_) = output {
        log::info!("'{}' is unchanged", class_name);
    }

    let output_file = output_dir.join(format!("{}.class", class_name));
    if let Some(parent) = output_file.parent() {
        fs::create_dir_all(parent).map_err(jvm::Error::IoError)?;
    }
    log::info!("Writing '{}'", output_file.display());
    fs::write(&output_file, output.as_ref()).map_err(jvm::Error::IoError)?;
    Ok(())
}
