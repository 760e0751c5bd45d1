use minijinja::{context, Environment};
use crate::chat::MessageStore;
use crate::def::ServerError;

const TEMPLATE_NAME: &'static str = "chat.html";

const TEMPLATE: &'static str = r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <title>ChatServer</title>
    <link href="https://stackpath.bootstrapcdn.com/bootswatch/4.3.1/superhero/bootstrap.min.css" rel="stylesheet" integrity="sha384-LS4/wo5Z/8SLpOLHs0IbuPAGOWTx30XSoZJ8o7WKH0UJhRpjXXTpODOjfVnNjeHu" crossorigin="anonymous">
</head>
<body>
<div><h3 align=justify>ChatServer</h3></div>
<div class="container">
    <div class="col-lg-6 col-lg-offset-3">
        <div id="chat-window" class="card card-body">
{%- for line in messages %}
            <p>{{ line }}</p>
{%- endfor %}
        </div>
        <div id="chat-input" class="form-group card-header">
            <form action="/" method="post">
                <input type="text" name="username" class="form-control-sm" placeholder="Username">
                <input type="text" name="message" class="form-control-sm" placeholder="Type your message...">
                <input type="submit" value="Send" class="btn btn-success">
            </form>
        </div>
    </div>
</div>
</body>
</html>
"#;

/// The chat page: every stored message followed by the posting form.
/// Message text is html-escaped on the way in.
pub struct Page {
    env: Environment<'static>,
}

impl Page {
    pub fn new() -> Result<Self, ServerError> {
        let mut env = Environment::new();
        env.add_template(TEMPLATE_NAME, TEMPLATE)?;
        Ok(Self { env })
    }

    pub fn render(&self, store: &MessageStore) -> Result<String, ServerError> {
        let messages: Vec<String> = store.render_all().collect();
        let template = self.env.get_template(TEMPLATE_NAME)?;
        Ok(template.render(context! { messages => messages })?)
    }
}
