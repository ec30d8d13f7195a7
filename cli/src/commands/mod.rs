mod ammonia;
mod chat;
mod helpers;
mod history;
mod species;

pub(crate) use ammonia::cmd_ammonia;
pub(crate) use chat::cmd_chat;
pub(crate) use history::cmd_history;
pub(crate) use species::{cmd_species_list, cmd_species_show};
