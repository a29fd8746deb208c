pub(crate) mod helpers;
mod run;
