mod helpers;
mod generator;
