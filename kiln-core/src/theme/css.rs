pub const GRAY: &str = "@import url(//fonts.googleapis.com/css?family=Lato:300); body { background-color: #e7eaed; color: #0b0b0b; font-family: 'Lato', sans-serif; font-weight: 300; margin: 4.5em; font-size: 1em; } a { color: #401010; font-family: courier; } a:hover { color: #801010; } a:active { color: yellow; } h1 { color: #101010; } img { max-width: 100%; }";

pub const DARK: &str = "@import url(//fonts.googleapis.com/css?family=Lato:400); body { background-color: #101010; color: #f0f0f0; font-family: 'Lato', sans-serif; font-weight: 400; margin: 4.5em; font-size: 1em; } a { color: #c0a0a0; font-family: courier; } a:hover { color: #f0a0a0; } a:active { color: yellow; } h1 { color: #f0f0f0; } img { max-width: 100%; }";

pub const REDBOX: &str = "@import url(//fonts.googleapis.com/css?family=Monoton|Monofett);html{background-color:#222;}body{color:#111;background-color:#999;font-family:Impact,'Arial Black',sans-serif;font-size:1.7em;margin:2.7em;padding:0 5em 1em 2em;border-radius:50px;border:solid 10px #a00;box-shadow:10px 10px 16px black, 6px 6px 8px #222 inset;}h2{font-family:Monoton,cursive;color:black;}ul{margin-left:1em;}a{text-decoration:none;color:#b00;}a:hover{color:#dc0;}code{font-family:Monofett,cursive;} img { max-width: 100%; }";

pub const MATERIAL: &str = "body { background-color: #fafafa; color: rgba(0,0,0,0.87); font-family: Roboto, 'Helvetica Neue', Arial, sans-serif; margin: 0 auto; max-width: 52em; padding: 2em 3em; line-height: 1.6; } h1, h2, h3 { font-weight: 400; color: #3f51b5; } a { color: #ff4081; text-decoration: none; } a:hover { text-decoration: underline; } pre, code { background-color: #eceff1; border-radius: 2px; } pre { padding: 1em; overflow-x: auto; box-shadow: 0 1px 3px rgba(0,0,0,0.12), 0 1px 2px rgba(0,0,0,0.24); } blockquote { border-left: 4px solid #3f51b5; margin-left: 0; padding-left: 1em; color: rgba(0,0,0,0.6); } table { border-collapse: collapse; } td, th { border-bottom: 1px solid #e0e0e0; padding: 0.4em 1em; } img { max-width: 100%; }";

/// Fonts loaded in `<head>` for the material theme.
pub const MATERIAL_HEAD: &str = "<link rel=\"stylesheet\" href=\"//fonts.googleapis.com/css?family=Roboto:300,400,500\">";
