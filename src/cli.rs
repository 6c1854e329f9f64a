use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "zipvfs")]
#[command(version)]
#[command(about = "Browse a ZIP archive as a read-only filesystem", long_about = None)]
#[command(after_help = "Examples:\n  \
  zipvfs data.zip                          list the archive tree\n  \
  zipvfs -v data.zip                       list with sizes and timestamps\n  \
  zipvfs -p readme.txt data.zip            print one entry to stdout\n  \
  zipvfs -p big.bin -s 4096 data.zip       print starting at byte 4096\n  \
  zipvfs -l https://example.com/kit.zip    list a remote archive")]
pub struct Cli {
    /// ZIP archive path or HTTP URL
    #[arg(value_name = "FILE")]
    pub file: String,

    /// List entries (short format)
    #[arg(short = 'l')]
    pub list: bool,

    /// List entries verbosely
    #[arg(short = 'v')]
    pub verbose: bool,

    /// Print the named entry to stdout (repeatable)
    #[arg(short = 'p', value_name = "NAME")]
    pub print: Vec<String>,

    /// Start printing at this byte offset
    #[arg(short = 's', value_name = "OFFSET", requires = "print")]
    pub start_offset: Option<u64>,

    /// Skip symbolic links when listing
    #[arg(short = 'S')]
    pub skip_symlinks: bool,

    /// Quiet mode
    #[arg(short = 'q', action = clap::ArgAction::Count)]
    pub quiet: u8,
}

impl Cli {
    pub fn is_http_url(&self) -> bool {
        self.file.starts_with("http://") || self.file.starts_with("https://")
    }

    pub fn is_quiet(&self) -> bool {
        self.quiet > 0 || !self.print.is_empty()
    }
}
