mod framework;
mod rs;
