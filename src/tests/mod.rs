mod cli;
mod model;
