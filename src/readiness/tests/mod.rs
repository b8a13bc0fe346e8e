mod common;
mod routing;
mod training;
