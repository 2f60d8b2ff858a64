//! Expand makefile macro references in the provided text.
//!
//! ```text
//! USAGE: mkvar [-f MAKEFILE] [--prefix PREFIX] [--no-env] [--list] [-v] TEXT...
//! ```
//!
//! Each TEXT is expanded against the makefile (default `Makefile`, or `$MKVAR_MAKEFILE`) with the
//! environment as a fallback, and printed on its own line.

use mkvar::{Document, EnvironmentVariableProvider, Error, VariableProvider};

const USAGE: &str =
    "USAGE: mkvar [-f MAKEFILE] [--prefix PREFIX] [--no-env] [--list] [-v] TEXT...";

////////////////////////////////////////////// Options /////////////////////////////////////////////

#[derive(Debug, Default, Eq, PartialEq)]
struct Options {
    makefile: Option<String>,
    prefix: Option<String>,
    no_env: bool,
    list: bool,
    verbosity: usize,
}

impl Options {
    fn from_args(args: &[String]) -> Result<(Self, Vec<String>), Error> {
        let mut opts = getopts::Options::new();
        opts.parsing_style(getopts::ParsingStyle::StopAtFirstFree);
        opts.optopt("f", "file", "Makefile to search for definitions.", "MAKEFILE");
        opts.optopt(
            "",
            "prefix",
            "Prefer environment variables with this prefix.",
            "PREFIX",
        );
        opts.optflag("", "no-env", "Do not fall back to the environment.");
        opts.optflag("l", "list", "List referenced names rather than expanding.");
        opts.optflagmulti("v", "verbose", "Log more.  Repeat for more detail.");
        let matches = opts
            .parse(args)
            .map_err(|err| Error::invalid_invocation(err.to_string()))?;
        let options = Self {
            makefile: matches.opt_str("f"),
            prefix: matches.opt_str("prefix"),
            no_env: matches.opt_present("no-env"),
            list: matches.opt_present("l"),
            verbosity: matches.opt_count("v"),
        };
        Ok((options, matches.free))
    }

    fn makefile(&self) -> String {
        self.makefile
            .clone()
            .or_else(|| std::env::var("MKVAR_MAKEFILE").ok())
            .unwrap_or_else(|| "Makefile".to_string())
    }

    fn level(&self) -> tracing::Level {
        match self.verbosity {
            0 => tracing::Level::WARN,
            1 => tracing::Level::DEBUG,
            _ => tracing::Level::TRACE,
        }
    }
}

/////////////////////////////////////////////// main ///////////////////////////////////////////////

fn run(options: &Options, free: &[String]) -> Result<(), Error> {
    if free.is_empty() {
        return Err(Error::invalid_invocation("no TEXT to expand"));
    }
    if options.list {
        for text in free {
            println!("{}", mkvar::references(text).join(" "));
        }
        return Ok(());
    }
    let makefile = options.makefile();
    let document = Document::from_path(&makefile)?;
    tracing::debug!(
        makefile = makefile.as_str(),
        definitions = document.definitions().len(),
        "loaded makefile"
    );
    let env: Box<dyn VariableProvider> = if options.no_env {
        Box::new(())
    } else {
        Box::new(EnvironmentVariableProvider::new(options.prefix.clone()))
    };
    for text in free {
        if !mkvar::is_expandable_candidate(text) {
            tracing::warn!(
                text = text.as_str(),
                "skipping text with parentheses that are not $(NAME) references"
            );
            continue;
        }
        println!("{}", mkvar::expand_with(&(&document, &*env), text));
    }
    Ok(())
}

fn main() {
    let args = std::env::args().skip(1).collect::<Vec<_>>();
    let (options, free) = match Options::from_args(&args) {
        Ok(parsed) => parsed,
        Err(err) => {
            eprintln!("{err}\n{USAGE}");
            std::process::exit(1);
        }
    };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_max_level(options.level())
        .init();
    if let Err(err) = run(&options, &free) {
        eprintln!("mkvar: {err}");
        std::process::exit(1);
    }
}
