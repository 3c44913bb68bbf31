mod catalog;
mod cds;
mod helpers;
mod retrieve;
