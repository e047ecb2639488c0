mod cooldowns;
mod supervisor;
