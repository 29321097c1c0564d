
mod config;
mod db;
