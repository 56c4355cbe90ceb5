use structopt::StructOpt;

#[derive(StructOpt, Debug)]
#[structopt(rename_all = "kebab-case", name = "nocturned")]
pub struct Config {
    #[structopt(flatten)]
    pub bin_common_config: bin_common::Config,

    #[structopt(flatten)]
    pub cryptonote_core_config: cryptonote_core::Config,
}
