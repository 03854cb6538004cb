use argp::FromArgs;

/// Top-level command
#[derive(FromArgs, PartialEq, Debug)]
#[argp(description = "A linking compressor for tiny ELF executables.")]
pub struct Elfpress {
    #[argp(option, short = 'v', global, default = "0")]
    #[argp(
        description = "Logging level (0 = Off, 1 = Error, 2 = Warn, 3 = Info, 4 = Debug, 5 = Trace)"
    )]
    pub verbose: usize,

    #[argp(subcommand)]
    pub nested: Modules,
}

/// The operations elfpress supports via command line.
#[derive(FromArgs, PartialEq, Debug)]
#[argp(subcommand)]
#[non_exhaustive]
pub enum Modules {
    Link(LinkOption),
    Pack(PackOption),
}

/// Command to link one relocatable object into a self-extracting executable.
#[derive(FromArgs, PartialEq, Debug)]
#[argp(subcommand, name = "link")]
#[argp(description = "Link a relocatable object into a compressed executable")]
pub struct LinkOption {
    #[argp(option, short = 'o')]
    #[argp(description = "Output file, defaults to c.out")]
    pub output: Option<String>,

    #[argp(option, short = 'c')]
    #[argp(description = "Initial compression parameters in CCWWXXWWXX... hex form")]
    pub params: Option<String>,

    #[argp(switch)]
    #[argp(description = "Treat round-trip verification mismatches as fatal")]
    pub strict: bool,

    #[argp(option)]
    #[argp(description = "Write the raw pre-compression payload to this path")]
    pub dump_payload: Option<String>,

    //We always need an input file, output file can be optional with a default
    #[argp(positional)]
    #[argp(description = "Input object to be linked")]
    pub input: String,
}

/// Command to run the bare coder over an arbitrary file.
#[derive(FromArgs, PartialEq, Debug)]
#[argp(subcommand, name = "pack")]
#[argp(description = "Compress or decompress a raw file with the arithmetic coder")]
pub struct PackOption {
    #[argp(switch, short = 'd')]
    #[argp(description = "Decompress the input file")]
    pub decompress: bool,

    #[argp(switch, short = 'c')]
    #[argp(description = "Compress the input file")]
    pub compress: bool,

    #[argp(option, short = 'o')]
    #[argp(description = "Output file, defaults to the input with a new extension")]
    pub output: Option<String>,

    #[argp(option, short = 'p')]
    #[argp(description = "Initial compression parameters in CCWWXXWWXX... hex form")]
    pub params: Option<String>,

    #[argp(positional)]
    #[argp(description = "Input file to be processed")]
    pub input: String,
}

#[must_use]
pub fn exactly_one_true(bools: &[bool]) -> Option<usize> {
    let mut count: usize = 0;
    let mut index: usize = 0;

    for (i, &val) in bools.iter().enumerate() {
        if val {
            count += 1;
            index = i;
        }

        if count > 1 {
            break;
        }
    }

    (count == 1).then_some(index)
}
